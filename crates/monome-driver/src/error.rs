//! 驱动层错误类型定义

use monome_protocol::ProtocolError;
use monome_serial::{TransportDeviceErrorKind, TransportError};
use thiserror::Error;

/// 驱动层错误类型
///
/// 每个会话的错误互相隔离；校验错误总是同步返回。
#[derive(Error, Debug)]
pub enum MonomeError {
    /// 设备节点不存在，或枚举不到任何设备
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// 设备已被其它会话（或进程）打开
    #[error("Device busy: {0}")]
    Busy(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 识别阶段没有在限定时间内得到应答
    #[error("Device did not identify within {timeout_ms} ms")]
    ProtocolTimeout { timeout_ms: u64 },

    /// 序列号不在型号表中
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// 坐标或数值越界（缓冲区未被修改）
    #[error("Validation error: {0}")]
    Validation(#[source] ProtocolError),

    /// 设备或协议不具备该能力
    #[error("Unsupported: {0}")]
    Unsupported(#[source] ProtocolError),

    #[error("Session closed")]
    SessionClosed,
}

impl MonomeError {
    /// 是否为参数校验错误
    pub fn is_validation(&self) -> bool {
        matches!(self, MonomeError::Validation(_))
    }
}

impl From<ProtocolError> for MonomeError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Unsupported { .. } => MonomeError::Unsupported(e),
            other => MonomeError::Validation(other),
        }
    }
}

impl From<TransportError> for MonomeError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Io(io) => MonomeError::Io(io),
            TransportError::Device(dev) => match dev.kind {
                TransportDeviceErrorKind::NotFound => MonomeError::NotFound(dev.message),
                TransportDeviceErrorKind::PermissionDenied => {
                    MonomeError::PermissionDenied(dev.message)
                },
                TransportDeviceErrorKind::Busy => MonomeError::Busy(dev.message),
                TransportDeviceErrorKind::UnsupportedConfig | TransportDeviceErrorKind::Unknown => {
                    MonomeError::Io(std::io::Error::other(dev.to_string()))
                },
            },
            TransportError::Timeout => {
                MonomeError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "read timeout"))
            },
            TransportError::Disconnected => MonomeError::Disconnected,
            TransportError::Closed => MonomeError::SessionClosed,
        }
    }
}
