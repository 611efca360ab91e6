//! 会话性能指标
//!
//! 原子计数器，事件循环线程写入，任意线程读取快照，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 会话实时指标
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// 从设备读到的字节数
    pub bytes_rx: AtomicU64,
    /// 写往设备的字节数
    pub bytes_tx: AtomicU64,
    /// 成功投递的事件数（回调返回 Ok 或进入通道）
    pub events_delivered: AtomicU64,
    /// 通道已满被丢弃的事件数
    pub events_dropped: AtomicU64,
    /// 回调返回错误或 panic 的次数
    pub handler_failures: AtomicU64,
    /// 读超时次数（正常现象，无输入时会超时）
    pub read_timeouts: AtomicU64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    ///
    /// 各计数器分别读取，彼此之间可能有微小的时间差。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_rx: self.bytes_rx.load(Ordering::Relaxed),
            bytes_tx: self.bytes_tx.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.bytes_rx.store(0, Ordering::Relaxed);
        self.bytes_tx.store(0, Ordering::Relaxed);
        self.events_delivered.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        self.handler_failures.store(0, Ordering::Relaxed);
        self.read_timeouts.store(0, Ordering::Relaxed);
    }
}

/// 指标快照（不可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    pub bytes_rx: u64,
    pub bytes_tx: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub handler_failures: u64,
    pub read_timeouts: u64,
}

impl MetricsSnapshot {
    /// 丢弃率（百分比）；没有事件时返回 0.0
    pub fn drop_rate(&self) -> f64 {
        let total = self.events_delivered + self.events_dropped;
        if total == 0 {
            return 0.0;
        }
        (self.events_dropped as f64 / total as f64) * 100.0
    }
}
