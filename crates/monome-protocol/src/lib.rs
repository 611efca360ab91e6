//! # Monome Protocol
//!
//! monome grid / arc 串口协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `geometry`: 网格尺寸与旋转变换
//! - `levels`: 亮度等级工具（单色设备降级、半字节打包）
//! - `command`: 输出指令（主机 -> 设备）
//! - `event`: 输入事件与系统应答（设备 -> 主机）
//! - `variant`: 协议变体编解码器（40h / series / mext）
//! - `devices`: 设备型号表（序列号 -> 协议变体）
//!
//! ## 协议变体
//!
//! | 变体 | 设备 | 帧格式 |
//! |------|------|--------|
//! | 40h | monome 40h、arduinome | 固定 2 字节 |
//! | series | 64 / 128 / 256 | 高 4 位操作码，变长 |
//! | mext | 2011 年之后的 grid 与 arc | 子系统 + 指令字节，变长 |
//!
//! 所有编解码器都是纯函数（解码器只额外保留变体内部状态），不做任何 IO。

pub mod command;
pub mod devices;
pub mod event;
pub mod geometry;
pub mod levels;
pub mod variant;

// 重新导出常用类型
pub use command::*;
pub use devices::*;
pub use event::*;
pub use geometry::*;
pub use levels::*;
pub use variant::*;

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{field} out of range: {value} (limit {limit})")]
    OutOfRange {
        field: &'static str,
        value: u16,
        limit: u16,
    },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: u8 },

    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("{what} is not supported by the {variant} protocol")]
    Unsupported {
        variant: &'static str,
        what: &'static str,
    },

    #[error("Unknown opcode: 0x{opcode:02X}")]
    UnknownOpcode { opcode: u8 },
}

impl ProtocolError {
    /// 是否为参数校验错误（坐标/数值越界）
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ProtocolError::OutOfRange { .. } | ProtocolError::InvalidValue { .. }
        )
    }
}

/// 检查 `value < limit`，否则返回 `OutOfRange`
#[inline]
pub(crate) fn check_below(field: &'static str, value: u8, limit: u8) -> Result<(), ProtocolError> {
    if value < limit {
        Ok(())
    } else {
        Err(ProtocolError::OutOfRange {
            field,
            value: value as u16,
            limit: limit as u16,
        })
    }
}
