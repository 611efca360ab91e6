//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use monome_sdk::prelude::*;
//! ```

// 驱动层
pub use crate::driver::{
    DeviceClass, DeviceInfo, ErrorSink, EventHandler, HandlerResult, MetricsSnapshot, Monome,
    MonomeBuilder, PollGroup, SessionConfig, SessionFailure, SessionState,
};

// 协议层
pub use crate::protocol::{Command, Event, EventType, GridSize, InboundEvent, ProtocolVariant, Rotation};

// 传输层
pub use crate::serial::{DeviceDescriptor, Discovery};

// 错误类型
pub use crate::driver::MonomeError;
pub use crate::protocol::ProtocolError;
pub use crate::serial::TransportError;
