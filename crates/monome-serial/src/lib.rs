//! # Monome Serial Transport Layer
//!
//! 串口传输层：打开设备节点、原始字节读写、设备枚举。
//!
//! - `tty`: unix 串口实现（termios 原始模式 + `flock` 独占锁 + `poll` 读超时）
//! - `discovery`: 设备枚举（Linux sysfs / macOS `/dev` 命名规则）
//! - `mock`: 内存中的模拟设备（`cfg(test)` 或 `mock` feature）

use std::time::Duration;
use thiserror::Error;

pub use monome_protocol;

#[cfg(unix)]
pub mod tty;

#[cfg(unix)]
pub use tty::{TtyRxTransport, TtyTransport, TtyTxTransport};

pub mod discovery;

pub use discovery::{DeviceDescriptor, Discovery};

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] TransportDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Device disconnected")]
    Disconnected,
    #[error("Transport closed")]
    Closed,
}

impl TransportError {
    /// 设备错误的分类；其它错误返回 `None`
    pub fn device_kind(&self) -> Option<TransportDeviceErrorKind> {
        match self {
            TransportError::Device(e) => Some(e.kind),
            _ => None,
        }
    }

    /// 是否为不可恢复的错误（事件循环遇到后会关闭会话）
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::Timeout => false,
            TransportError::Device(e) => e.is_fatal(),
            _ => true,
        }
    }
}

/// 设备错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDeviceErrorKind {
    Unknown,
    NotFound,
    PermissionDenied,
    Busy,
    UnsupportedConfig,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct TransportDeviceError {
    pub kind: TransportDeviceErrorKind,
    pub message: String,
}

impl TransportDeviceError {
    pub fn new(kind: TransportDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            TransportDeviceErrorKind::NotFound | TransportDeviceErrorKind::PermissionDenied
        )
    }
}

impl From<String> for TransportDeviceError {
    fn from(message: String) -> Self {
        Self::new(TransportDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for TransportDeviceError {
    fn from(message: &str) -> Self {
        Self::new(TransportDeviceErrorKind::Unknown, message)
    }
}

/// 完整的双向传输（识别阶段使用）
pub trait Transport {
    /// 设备路径
    fn path(&self) -> &str;

    /// 写入全部字节
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// 读取可用字节，最多等待 `timeout`
    ///
    /// 超时返回 `TransportError::Timeout`，不会返回 `Ok(0)`。
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// 释放底层资源；第一次之后的调用为空操作
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// 只读半部（事件循环线程）
pub trait RxTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
}

/// 只写半部（会话写锁内）
pub trait TxTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// 可分离为独立 RX / TX 半部的传输
///
/// 分离后读写互不阻塞：RX 在事件循环线程中阻塞等待，TX 在调用方线程中写入。
pub trait SplittableTransport: Transport {
    type Rx: RxTransport + Send + 'static;
    type Tx: TxTransport + Send + 'static;

    fn split(self) -> Result<(Self::Rx, Self::Tx), TransportError>;
}

impl<T: RxTransport + ?Sized> RxTransport for Box<T> {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        (**self).read(buf, timeout)
    }
}

impl<T: TxTransport + ?Sized> TxTransport for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).write_all(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!TransportError::Timeout.is_fatal());
        assert!(TransportError::Disconnected.is_fatal());
        let busy = TransportError::Device(TransportDeviceError::new(
            TransportDeviceErrorKind::Busy,
            "locked",
        ));
        assert_eq!(busy.device_kind(), Some(TransportDeviceErrorKind::Busy));
        assert!(!busy.is_fatal());
        let missing: TransportError =
            TransportDeviceError::new(TransportDeviceErrorKind::NotFound, "gone").into();
        assert!(missing.is_fatal());
    }

    #[test]
    fn test_device_error_display() {
        let err = TransportDeviceError::from("boom");
        assert_eq!(err.to_string(), "Unknown: boom");
    }
}
