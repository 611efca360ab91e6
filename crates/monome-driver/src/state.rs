//! 会话状态机
//!
//! ```text
//! Closed -> Opening -> Identifying -> Ready -> Closed
//!                                      |
//!                                      +-> Error -> Closed
//! ```
//!
//! 事件循环线程与调用方线程共享同一个状态，使用原子变量存储。

use std::sync::atomic::{AtomicU8, Ordering};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SessionState {
    #[default]
    Closed = 0,
    /// 正在打开传输
    Opening = 1,
    /// 正在识别设备
    Identifying = 2,
    Ready = 3,
    /// 传输出现不可恢复的错误，等待自动关闭
    Error = 4,
}

impl SessionState {
    /// 从 u8 转换，无效值视为 Closed
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Opening,
            2 => Self::Identifying,
            3 => Self::Ready,
            4 => Self::Error,
            _ => Self::Closed,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    /// 状态机允许的迁移
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Closed, Opening)
                | (Opening, Identifying)
                | (Opening, Closed)
                | (Identifying, Ready)
                | (Identifying, Closed)
                | (Ready, Closed)
                | (Ready, Error)
                | (Error, Closed)
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Identifying => "identifying",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 会话状态（原子版本，用于线程间共享）
#[derive(Debug)]
pub struct AtomicSessionState {
    inner: AtomicU8,
}

impl AtomicSessionState {
    pub fn new(state: SessionState) -> Self {
        Self {
            inner: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.inner.load(Ordering::Acquire))
    }

    /// 按状态机迁移；非法迁移返回 `false` 且不修改状态
    ///
    /// 并发调用时只有一个调用方能从同一个状态迁出。
    pub fn transition(&self, next: SessionState) -> bool {
        let mut current = self.inner.load(Ordering::Acquire);
        loop {
            if !SessionState::from_u8(current).can_transition_to(next) {
                return false;
            }
            match self.inner.compare_exchange_weak(
                current,
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}
