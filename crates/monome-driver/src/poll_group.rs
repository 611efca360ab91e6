//! 多会话等待点
//!
//! 把多个会话的事件通道合并到一个 `wait()` 调用中，适合单线程处理多台设备的调用方。

use crate::session::{Monome, SessionId};
use crossbeam_channel::{Receiver, Select, TryRecvError};
use monome_protocol::InboundEvent;
use std::time::Duration;
use tracing::debug;

/// 事件处理函数（在调用 `wait()` 的线程中执行）
pub type PollHandler = Box<dyn FnMut(SessionId, &InboundEvent) + Send>;

struct Member {
    id: SessionId,
    rx: Receiver<InboundEvent>,
    handler: PollHandler,
}

/// 会话集合
///
/// 加入集合会替换该会话之前的事件通道。会话关闭后成员会在下一次 `wait()` 中移除。
#[derive(Default)]
pub struct PollGroup {
    members: Vec<Member>,
}

impl PollGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入会话；同一会话重复加入返回 false
    pub fn add(
        &mut self,
        session: &Monome,
        handler: impl FnMut(SessionId, &InboundEvent) + Send + 'static,
    ) -> bool {
        let id = session.id();
        if self.contains(id) {
            return false;
        }
        self.members.push(Member {
            id,
            rx: session.default_event_channel(),
            handler: Box::new(handler),
        });
        debug!("Session {} added to poll group ({} members)", id, self.members.len());
        true
    }

    /// 移除会话（与最后一个成员交换位置）
    pub fn remove(&mut self, id: SessionId) -> bool {
        match self.members.iter().position(|m| m.id == id) {
            Some(index) => {
                self.members.swap_remove(index);
                true
            },
            None => false,
        }
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// 等待任一会话产生事件，然后处理所有已到达的事件
    ///
    /// 返回处理的事件数；超时（或集合为空）返回 0。
    pub fn wait(&mut self, timeout: Duration) -> usize {
        if self.members.is_empty() {
            std::thread::sleep(timeout);
            return 0;
        }

        {
            let mut select = Select::new();
            for member in &self.members {
                select.recv(&member.rx);
            }
            if select.ready_timeout(timeout).is_err() {
                return 0;
            }
        }

        let mut dispatched = 0;
        let mut closed = Vec::new();
        for member in &mut self.members {
            loop {
                match member.rx.try_recv() {
                    Ok(event) => {
                        (member.handler)(member.id, &event);
                        dispatched += 1;
                    },
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed.push(member.id);
                        break;
                    },
                }
            }
        }
        for id in closed {
            debug!("Session {} left poll group (channel closed)", id);
            self.remove(id);
        }
        dispatched
    }
}
