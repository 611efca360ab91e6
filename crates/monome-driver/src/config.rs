//! 会话配置

use std::time::Duration;

/// 会话配置（POD，可序列化）
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// 每次绘制后立即写出受影响的区域（默认 false，等待 `refresh()`）
    pub auto_flush: bool,
    /// 事件循环单次读取的超时（毫秒），同时决定关闭会话的最长等待
    pub read_timeout_ms: u64,
    /// 识别设备的超时（毫秒）
    pub identify_timeout_ms: u64,
    /// 关闭前是否刷新帧缓冲区
    pub flush_on_close: bool,
    /// `event_channel()` 的默认容量
    pub event_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_flush: false,
            read_timeout_ms: 10,
            identify_timeout_ms: 500,
            flush_on_close: true,
            event_channel_capacity: 64,
        }
    }
}

impl SessionConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn identify_timeout(&self) -> Duration {
        Duration::from_millis(self.identify_timeout_ms)
    }
}
