//! 事件循环线程
//!
//! 每个会话一个线程：带超时读取 RX 半部、增量解码、转换到逻辑坐标、按到达顺序投递。
//! 读超时用于定期检查 `is_running`，关闭会话后最多一个读超时周期内退出。

use crate::hooks::Delivery;
use crate::session::SessionShared;
use monome_protocol::{Codec, Inbound, InboundEvent, ProtocolCodec};
use monome_serial::{RxTransport, TransportError};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{error, trace, warn};

/// 读缓冲区大小
const READ_CHUNK: usize = 256;

/// 非致命读错误后的退避
const ERROR_BACKOFF: Duration = Duration::from_millis(5);

pub(crate) fn event_loop(
    mut rx: impl RxTransport,
    mut codec: Codec,
    shared: Arc<SessionShared>,
    residual: Vec<u8>,
) {
    let read_timeout = shared.config.read_timeout();
    let mut pending = residual;
    let mut buf = [0u8; READ_CHUNK];

    loop {
        // Acquire: 看到 false 时也能看到关闭路径的全部写入
        if !shared.is_running.load(Ordering::Acquire) {
            trace!("Event loop for {}: is_running is false, exiting", shared.info.path);
            break;
        }

        if !pending.is_empty() {
            deliver_pending(&mut codec, &shared, &mut pending);
        }

        match rx.read(&mut buf, read_timeout) {
            Ok(n) => {
                shared.metrics.bytes_rx.fetch_add(n as u64, Ordering::Relaxed);
                pending.extend_from_slice(&buf[..n]);
            },
            Err(TransportError::Timeout) => {
                shared.metrics.read_timeouts.fetch_add(1, Ordering::Relaxed);
            },
            Err(e) => {
                if !shared.is_running.load(Ordering::Acquire) {
                    // 会话正在关闭，读错误是释放传输的结果
                    break;
                }
                if !e.is_fatal() {
                    warn!("Event loop for {}: read error: {}", shared.info.path, e);
                    std::thread::sleep(ERROR_BACKOFF);
                    continue;
                }
                error!("Event loop for {}: fatal read error: {}", shared.info.path, e);
                shared.fail(e.into());
                break;
            },
        }
    }
    trace!("Event loop for {} stopped", shared.info.path);
}

fn deliver_pending(codec: &mut Codec, shared: &SessionShared, pending: &mut Vec<u8>) {
    let decoded = codec.decode_bytes(pending);
    pending.drain(..decoded.consumed);

    for msg in decoded.messages {
        // 关闭后不再投递
        if !shared.is_running.load(Ordering::Acquire) {
            return;
        }
        let event = match msg {
            Inbound::Event(event) => event,
            Inbound::Reply(reply) => {
                trace!("Unsolicited reply: {:?}", reply);
                continue;
            },
            Inbound::Ignored(opcode) => {
                trace!("Ignoring opcode 0x{:02X}", opcode);
                continue;
            },
        };

        let event = match event.grid_position() {
            Some((x, y)) => {
                let physical = shared.info.grid;
                if !physical.contains(x, y) {
                    warn!("Dropping {} outside the {} grid", event, physical);
                    continue;
                }
                let (lx, ly) = shared.rotation().to_logical(x, y, physical);
                event.with_grid_position(lx, ly)
            },
            None => event,
        };

        let inbound = InboundEvent {
            event,
            timestamp_us: shared.started.elapsed().as_micros() as u64,
        };
        match shared.handlers.dispatch(&inbound) {
            Delivery::Delivered => {
                shared.metrics.events_delivered.fetch_add(1, Ordering::Relaxed);
            },
            Delivery::Dropped => {
                shared.metrics.events_dropped.fetch_add(1, Ordering::Relaxed);
            },
            Delivery::Failed => {
                shared.metrics.handler_failures.fetch_add(1, Ordering::Relaxed);
            },
            Delivery::Unhandled => trace!("No handler for {}", inbound.event),
        }
    }
}
