//! 回调系统
//!
//! 事件循环线程按到达顺序同步调用已注册的回调：
//! - 按事件类别注册（按键 / 编码器 / 编码器按键 / 倾斜），或注册一个兜底回调
//! - 某个类别有专属回调时不再调用兜底回调
//! - 运行中可随时替换（`ArcSwap` 无锁读取）
//!
//! 回调返回错误或 panic 不会终止事件循环，失败交给错误接收器。

use crate::error::MonomeError;
use arc_swap::ArcSwapOption;
use crossbeam_channel::{Sender, TrySendError};
use monome_protocol::{EventType, InboundEvent};
use std::sync::Arc;

/// 回调返回值
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// 事件回调 Trait
///
/// 在事件循环线程中调用，耗时会直接推迟后续事件的投递。
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &InboundEvent) -> HandlerResult;
}

impl<F> EventHandler for F
where
    F: Fn(&InboundEvent) -> HandlerResult + Send + Sync,
{
    fn on_event(&self, event: &InboundEvent) -> HandlerResult {
        self(event)
    }
}

/// 报告给错误接收器的失败
#[derive(Debug)]
pub enum SessionFailure {
    /// 回调返回了错误
    Handler {
        event_type: EventType,
        message: String,
    },
    /// 回调 panic
    HandlerPanic {
        event_type: EventType,
        message: String,
    },
    /// 传输出现不可恢复的错误，会话随后自动关闭（每个会话只报告一次）
    Transport(MonomeError),
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionFailure::Handler {
                event_type,
                message,
            } => write!(f, "{:?} handler failed: {}", event_type, message),
            SessionFailure::HandlerPanic {
                event_type,
                message,
            } => write!(f, "{:?} handler panicked: {}", event_type, message),
            SessionFailure::Transport(e) => write!(f, "transport failure: {}", e),
        }
    }
}

/// 错误接收器
pub trait ErrorSink: Send + Sync {
    fn on_failure(&self, failure: &SessionFailure);
}

impl<F> ErrorSink for F
where
    F: Fn(&SessionFailure) + Send + Sync,
{
    fn on_failure(&self, failure: &SessionFailure) {
        self(failure)
    }
}

// ArcSwap 只能存放 Sized 类型，trait object 需要再包一层
struct HandlerSlot(Arc<dyn EventHandler>);
struct SinkSlot(Arc<dyn ErrorSink>);

/// 回调注册表（每个会话一个）
#[derive(Default)]
pub struct HandlerRegistry {
    by_type: [ArcSwapOption<HandlerSlot>; EventType::COUNT],
    catch_all: ArcSwapOption<HandlerSlot>,
    sink: ArcSwapOption<SinkSlot>,
    channel: ArcSwapOption<Sender<InboundEvent>>,
}

/// 投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 没有任何回调或通道
    Unhandled,
    Delivered,
    /// 通道已满，事件被丢弃
    Dropped,
    /// 回调失败（已报告给错误接收器）
    Failed,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.by_type[event_type.index()].store(Some(Arc::new(HandlerSlot(handler))));
    }

    pub fn clear(&self, event_type: EventType) {
        self.by_type[event_type.index()].store(None);
    }

    pub fn set_catch_all(&self, handler: Arc<dyn EventHandler>) {
        self.catch_all.store(Some(Arc::new(HandlerSlot(handler))));
    }

    pub fn clear_catch_all(&self) {
        self.catch_all.store(None);
    }

    pub fn set_error_sink(&self, sink: Arc<dyn ErrorSink>) {
        self.sink.store(Some(Arc::new(SinkSlot(sink))));
    }

    /// 替换事件通道（旧通道的接收端随之断开）
    pub fn set_channel(&self, tx: Option<Sender<InboundEvent>>) {
        self.channel.store(tx.map(Arc::new));
    }

    pub fn has_handler(&self, event_type: EventType) -> bool {
        self.by_type[event_type.index()].load().is_some() || self.catch_all.load().is_some()
    }

    /// 报告失败；没有接收器时只记录日志
    pub fn report(&self, failure: SessionFailure) {
        match self.sink.load_full() {
            Some(sink) => sink.0.on_failure(&failure),
            None => tracing::warn!("Unhandled session failure: {}", failure),
        }
    }

    /// 投递一个事件：先回调，再通道
    pub fn dispatch(&self, event: &InboundEvent) -> Delivery {
        let event_type = event.event.event_type();
        let handler = self.by_type[event_type.index()]
            .load_full()
            .or_else(|| self.catch_all.load_full());

        let mut delivery = Delivery::Unhandled;
        if let Some(handler) = handler {
            delivery = self.invoke(&handler.0, event_type, event);
        }

        if let Some(tx) = self.channel.load_full() {
            match tx.try_send(*event) {
                Ok(()) => {
                    if delivery == Delivery::Unhandled {
                        delivery = Delivery::Delivered;
                    }
                },
                Err(TrySendError::Full(_)) => {
                    tracing::trace!("Event channel full, dropping {}", event.event);
                    return Delivery::Dropped;
                },
                Err(TrySendError::Disconnected(_)) => {
                    self.channel.store(None);
                },
            }
        }
        delivery
    }

    fn invoke(
        &self,
        handler: &Arc<dyn EventHandler>,
        event_type: EventType,
        event: &InboundEvent,
    ) -> Delivery {
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler.on_event(event)));
        match result {
            Ok(Ok(())) => Delivery::Delivered,
            Ok(Err(e)) => {
                self.report(SessionFailure::Handler {
                    event_type,
                    message: e.to_string(),
                });
                Delivery::Failed
            },
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                self.report(SessionFailure::HandlerPanic {
                    event_type,
                    message,
                });
                Delivery::Failed
            },
        }
    }
}
