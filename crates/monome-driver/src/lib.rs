//! 驱动层模块
//!
//! 本模块提供 monome grid / arc 的设备会话功能，包括：
//! - 设备识别（型号表 + mext 查询）
//! - 帧缓冲区（批量绘制、脏区域刷新、旋转）
//! - 事件循环线程（增量解码、按类别投递、有界通道）
//! - 会话状态机与性能指标
//!
//! # 使用场景
//!
//! 适用于需要直接控制设备的应用。C 调用方请使用 `monome-sdk` 的 `ffi` 模块。

mod builder;
pub mod config;
mod error;
mod event_loop;
pub mod framebuffer;
pub mod hooks;
pub mod identify;
pub mod metrics;
pub mod poll_group;
mod session;
pub mod state;

pub use builder::MonomeBuilder;
pub use config::SessionConfig;
pub use error::MonomeError;
pub use framebuffer::{FrameBuffer, Region};
pub use hooks::{
    Delivery, ErrorSink, EventHandler, HandlerRegistry, HandlerResult, SessionFailure,
};
pub use identify::{DeviceClass, DeviceInfo, Identified, identify, known_model};
pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use poll_group::{PollGroup, PollHandler};
pub use session::{Monome, SessionId};
pub use state::{AtomicSessionState, SessionState};
