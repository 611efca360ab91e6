//! monome SDK - monome grid / arc 的 Rust SDK
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 40h / series / mext 三种协议变体的编解码，无 IO
//! - **传输层** (`serial`): 串口读写、设备枚举、模拟设备
//! - **驱动层** (`driver`): 设备会话、帧缓冲区、事件循环
//! - **C 接口** (`ffi`): 句柄化的 `extern "C"` 入口，供绑定层链接
//!
//! # 快速开始
//!
//! ```no_run
//! use monome_sdk::prelude::*;
//!
//! monome_sdk::init_logger!();
//! let mut grid = MonomeBuilder::new().build()?;
//! grid.set_handler(EventType::Button, |ev: &InboundEvent| -> HandlerResult {
//!     println!("{}", ev.event);
//!     Ok(())
//! });
//! grid.led_on(0, 0)?;
//! grid.refresh()?;
//! grid.close()?;
//! # Ok::<(), MonomeError>(())
//! ```

pub use monome_driver as driver;
pub use monome_protocol as protocol;
pub use monome_serial as serial;

pub mod ffi;
pub mod logging;

// Prelude 模块
pub mod prelude;

// --- 用户以此为界 ---

pub use driver::{
    DeviceClass, DeviceInfo, Monome, MonomeBuilder, MonomeError, PollGroup, SessionConfig,
    SessionState,
};
pub use protocol::{Command, Event, EventType, InboundEvent, ProtocolError, Rotation};
pub use serial::{DeviceDescriptor, Discovery, TransportError};
