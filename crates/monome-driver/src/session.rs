//! 设备会话（对外 API）
//!
//! 一个 `Monome` 绑定一个传输与一个协议变体：
//! - 调用方线程：绘制、刷新、查询元数据（写锁串行化 TX 半部与帧缓冲区）
//! - 事件循环线程：读取 RX 半部、解码、投递事件
//!
//! 关闭会话（或 drop）会停止事件循环、释放传输；之后的操作返回 `SessionClosed`。

use crate::config::SessionConfig;
use crate::error::MonomeError;
use crate::event_loop::event_loop;
use crate::framebuffer::FrameBuffer;
use crate::hooks::{ErrorSink, EventHandler, HandlerRegistry, SessionFailure};
use crate::identify::{DeviceInfo, identify};
use crate::metrics::{MetricsSnapshot, SessionMetrics};
use crate::state::{AtomicSessionState, SessionState};
use crossbeam_channel::Receiver;
use monome_protocol::{
    Bounds, Codec, Command, EventType, GridSize, InboundEvent, ProtocolCodec, ProtocolError,
    ProtocolVariant, RING_LEDS, Rotation,
};
use monome_serial::{DeviceDescriptor, SplittableTransport, TxTransport};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Join with timeout (prevents shutdown from hanging)
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // watchdog 线程负责 join，超时后它继续运行，进程退出时回收
        spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

/// 会话唯一编号（进程内）
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// 事件循环线程退出的最长等待
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 写锁保护的状态
pub(crate) struct Writer {
    tx: Option<Box<dyn TxTransport + Send>>,
    codec: Codec,
    frame: FrameBuffer,
}

impl Writer {
    /// 编码并一次写出；空指令列表不产生 IO
    fn write_commands(&mut self, cmds: &[Command], metrics: &SessionMetrics) -> Result<(), MonomeError> {
        if cmds.is_empty() {
            return Ok(());
        }
        let mut bytes: SmallVec<[u8; 256]> = SmallVec::new();
        for cmd in cmds {
            bytes.extend_from_slice(&self.codec.encode_command(cmd)?);
        }
        let tx = self.tx.as_mut().ok_or(MonomeError::SessionClosed)?;
        tx.write_all(&bytes)?;
        metrics.bytes_tx.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        trace!("TX {} bytes ({} commands)", bytes.len(), cmds.len());
        Ok(())
    }
}

/// 会话与事件循环线程共享的上下文
pub(crate) struct SessionShared {
    pub(crate) id: SessionId,
    pub(crate) info: DeviceInfo,
    pub(crate) config: SessionConfig,
    pub(crate) state: AtomicSessionState,
    pub(crate) rotation: AtomicU8,
    /// 事件循环的取消标志
    pub(crate) is_running: AtomicBool,
    pub(crate) writer: Mutex<Writer>,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) metrics: SessionMetrics,
    pub(crate) started: Instant,
}

impl SessionShared {
    pub(crate) fn rotation(&self) -> Rotation {
        Rotation::from_bits(self.rotation.load(Ordering::Acquire))
    }

    /// 传输不可恢复：Ready -> Error，报告一次，然后自行关闭
    pub(crate) fn fail(&self, err: MonomeError) {
        if !self.state.transition(SessionState::Error) {
            return;
        }
        self.is_running.store(false, Ordering::Release);
        error!("Session {} failed: {}", self.info.path, err);
        self.handlers.report(SessionFailure::Transport(err));
        self.writer.lock().tx = None;
        self.handlers.set_channel(None);
        self.state.transition(SessionState::Closed);
        info!("Closed {} after transport failure", self.info.path);
    }
}

/// monome 设备会话
///
/// # Example
///
/// ```no_run
/// use monome_driver::{Monome, MonomeBuilder};
/// use monome_protocol::Command;
///
/// let mut grid = MonomeBuilder::new().device("/dev/ttyUSB0").build()?;
/// grid.set_handler(monome_protocol::EventType::Button, |ev: &monome_protocol::InboundEvent| {
///     println!("{}", ev.event);
///     Ok(())
/// });
/// grid.draw(&Command::LedRow { x_off: 0, y: 0, data: 0xFF })?;
/// grid.refresh()?;
/// grid.close()?;
/// # Ok::<(), monome_driver::MonomeError>(())
/// ```
pub struct Monome {
    shared: Arc<SessionShared>,
    loop_thread: Option<JoinHandle<()>>,
}

impl Monome {
    /// 打开指定路径的设备（默认配置）
    #[cfg(unix)]
    pub fn open(path: impl Into<String>) -> Result<Self, MonomeError> {
        crate::builder::MonomeBuilder::new().device(path).build()
    }

    /// 在已打开的传输上建立会话：识别设备、分离读写、启动事件循环
    ///
    /// 识别失败时传输会被关闭。
    pub fn with_transport<T: SplittableTransport>(
        mut transport: T,
        descriptor: Option<&DeviceDescriptor>,
        config: SessionConfig,
        rotation: Rotation,
    ) -> Result<Self, MonomeError> {
        let state = AtomicSessionState::new(SessionState::Closed);
        state.transition(SessionState::Opening);
        debug!("Opening {}", transport.path());

        state.transition(SessionState::Identifying);
        let identified = match identify(&mut transport, descriptor, config.identify_timeout()) {
            Ok(found) => found,
            Err(e) => {
                warn!("Failed to identify {}: {}", transport.path(), e);
                transport.close();
                return Err(e);
            },
        };
        let info = identified.info;

        let codec = Codec::with_bounds(info.variant, info.bounds());
        let frame = FrameBuffer::new(
            info.grid,
            info.rings,
            info.variant != ProtocolVariant::Mext,
        );
        let (rx, tx) = transport.split()?;

        let shared = Arc::new(SessionShared {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            info,
            config,
            state,
            rotation: AtomicU8::new(rotation as u8),
            is_running: AtomicBool::new(true),
            writer: Mutex::new(Writer {
                tx: Some(Box::new(tx)),
                codec: codec.clone(),
                frame,
            }),
            handlers: HandlerRegistry::new(),
            metrics: SessionMetrics::new(),
            started: Instant::now(),
        });
        shared.state.transition(SessionState::Ready);

        let loop_shared = shared.clone();
        let residual = identified.residual;
        let loop_thread = std::thread::Builder::new()
            .name(format!("monome-{}", shared.info.serial))
            .spawn(move || event_loop(rx, codec, loop_shared, residual))
            .inspect_err(|_| {
                shared.is_running.store(false, Ordering::Release);
                shared.state.transition(SessionState::Closed);
            })?;

        info!(
            "Opened {} ({}, {} protocol) at {}",
            shared.info.friendly_name, shared.info.serial, shared.info.variant, shared.info.path
        );
        Ok(Self {
            shared,
            loop_thread: Some(loop_thread),
        })
    }

    fn ensure_ready(&self) -> Result<(), MonomeError> {
        if self.shared.state.get().is_ready() {
            Ok(())
        } else {
            Err(MonomeError::SessionClosed)
        }
    }

    /// 能力检查 + 逻辑坐标校验
    fn check(&self, codec: &Codec, cmd: &Command, rotation: Rotation) -> Result<(), MonomeError> {
        let bounds = codec.bounds();
        if let Some(feature) = cmd.feature()
            && !(codec.supports(feature) && bounds.has(feature))
        {
            return Err(MonomeError::Unsupported(ProtocolError::Unsupported {
                variant: codec.variant().name(),
                what: feature.name(),
            }));
        }
        let logical = Bounds {
            grid: rotation.logical_size(bounds.grid),
            ..bounds
        };
        cmd.validate(&logical)?;
        Ok(())
    }

    /// 绘制指令（逻辑坐标）
    ///
    /// - 校验失败时缓冲区不变
    /// - `auto_flush` 时立即写出受影响的区域，否则等待 `refresh()`
    /// - 亮度与倾斜指令不进入帧缓冲区，总是立即写出
    pub fn draw(&self, cmd: &Command) -> Result<(), MonomeError> {
        self.ensure_ready()?;
        if let Command::SetRotation(rotation) = cmd {
            return self.set_rotation(*rotation);
        }

        let rotation = self.shared.rotation();
        let mut guard = self.shared.writer.lock();
        let writer = &mut *guard;
        self.check(&writer.codec, cmd, rotation)?;

        if writer.frame.apply(cmd, rotation) {
            if self.shared.config.auto_flush {
                let cmds = writer.frame.dirty_commands(writer.codec.frame_strategy());
                writer.write_commands(&cmds, &self.shared.metrics)?;
                writer.frame.mark_clean();
            }
            Ok(())
        } else {
            writer.write_commands(std::slice::from_ref(cmd), &self.shared.metrics)
        }
    }

    /// 按整帧策略写出整个帧缓冲区
    pub fn refresh(&self) -> Result<(), MonomeError> {
        self.ensure_ready()?;
        let mut guard = self.shared.writer.lock();
        let writer = &mut *guard;
        let cmds = writer.frame.frame_commands(writer.codec.frame_strategy());
        writer.write_commands(&cmds, &self.shared.metrics)?;
        writer.frame.mark_clean();
        debug!("Refreshed {} ({} commands)", self.shared.info.path, cmds.len());
        Ok(())
    }

    pub fn led_on(&self, x: u8, y: u8) -> Result<(), MonomeError> {
        self.draw(&Command::LedSet { x, y, on: true })
    }

    pub fn led_off(&self, x: u8, y: u8) -> Result<(), MonomeError> {
        self.draw(&Command::LedSet { x, y, on: false })
    }

    /// 熄灭全部 LED（arc 为全部光环）
    pub fn clear(&self) -> Result<(), MonomeError> {
        if self.shared.info.is_arc() {
            (0..self.shared.info.rings).try_for_each(|ring| self.draw(&Command::RingAll { ring, level: 0 }))
        } else {
            self.draw(&Command::LedAll { on: false })
        }
    }

    pub fn set_intensity(&self, level: u8) -> Result<(), MonomeError> {
        self.draw(&Command::Intensity { level })
    }

    /// 设置旋转方向（只对 grid 有效）
    ///
    /// 帧缓冲区以物理坐标保存，旋转不需要重绘。
    pub fn set_rotation(&self, rotation: Rotation) -> Result<(), MonomeError> {
        self.ensure_ready()?;
        if self.shared.info.is_arc() {
            return Err(MonomeError::Unsupported(ProtocolError::Unsupported {
                variant: self.shared.info.variant.name(),
                what: "rotation",
            }));
        }
        self.shared.rotation.store(rotation as u8, Ordering::Release);
        debug!("Rotation of {} set to {}", self.shared.info.path, rotation);
        Ok(())
    }

    // ==================== 元数据 ====================

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.shared.info
    }

    pub fn serial(&self) -> &str {
        &self.shared.info.serial
    }

    pub fn path(&self) -> &str {
        &self.shared.info.path
    }

    pub fn friendly_name(&self) -> &str {
        &self.shared.info.friendly_name
    }

    /// 协议名称（`40h` / `series` / `mext`）
    pub fn protocol(&self) -> &'static str {
        self.shared.info.variant.name()
    }

    pub fn rotation(&self) -> Rotation {
        self.shared.rotation()
    }

    /// 逻辑尺寸（考虑旋转）；arc 为 64 列 x 光环数行
    pub fn size(&self) -> GridSize {
        let info = &self.shared.info;
        if info.is_arc() {
            GridSize::new(RING_LEDS, info.rings)
        } else {
            self.rotation().logical_size(info.grid)
        }
    }

    pub fn rows(&self) -> u8 {
        self.size().rows
    }

    pub fn cols(&self) -> u8 {
        self.size().cols
    }

    pub fn rings(&self) -> u8 {
        self.shared.info.rings
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// 获取性能指标快照
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// 帧缓冲区副本（物理坐标）
    pub fn frame(&self) -> FrameBuffer {
        self.shared.writer.lock().frame.clone()
    }

    // ==================== 事件投递 ====================

    /// 为某一类事件注册回调（替换旧回调）
    pub fn set_handler(&self, event_type: EventType, handler: impl EventHandler + 'static) {
        self.shared.handlers.set(event_type, Arc::new(handler));
    }

    /// 注册兜底回调（接收没有专属回调的事件）
    pub fn set_catch_all_handler(&self, handler: impl EventHandler + 'static) {
        self.shared.handlers.set_catch_all(Arc::new(handler));
    }

    pub fn clear_handler(&self, event_type: EventType) {
        self.shared.handlers.clear(event_type);
    }

    pub fn clear_catch_all_handler(&self) {
        self.shared.handlers.clear_catch_all();
    }

    pub fn set_error_sink(&self, sink: impl ErrorSink + 'static) {
        self.shared.handlers.set_error_sink(Arc::new(sink));
    }

    /// 以有界通道接收事件（替换之前的通道）
    ///
    /// 通道满时事件被丢弃并计入 `events_dropped`。
    pub fn event_channel(&self, capacity: usize) -> Receiver<InboundEvent> {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        self.shared.handlers.set_channel(Some(tx));
        rx
    }

    /// 使用配置中的默认容量
    pub fn default_event_channel(&self) -> Receiver<InboundEvent> {
        self.event_channel(self.shared.config.event_channel_capacity)
    }

    // ==================== 生命周期 ====================

    /// 关闭会话
    ///
    /// 按配置先刷新帧缓冲区，再停止事件循环并释放传输。重复调用为空操作。
    /// 刷新失败时仍会完成关闭，并返回该错误。
    pub fn close(&mut self) -> Result<(), MonomeError> {
        let mut result = Ok(());
        if self.is_ready() && self.shared.config.flush_on_close {
            result = self.refresh();
            if let Err(e) = &result {
                warn!("Flush on close failed for {}: {}", self.shared.info.path, e);
            }
        }

        // Release：循环线程看到 false 时也能看到之前的写入
        self.shared.is_running.store(false, Ordering::Release);
        let was_ready = self.shared.state.transition(SessionState::Closed);
        self.shared.writer.lock().tx = None;
        self.shared.handlers.set_channel(None);

        if let Some(handle) = self.loop_thread.take()
            && let Err(_e) = handle.join_timeout(JOIN_TIMEOUT)
        {
            error!(
                "Event loop for {} panicked or failed to shut down within {:?}",
                self.shared.info.path, JOIN_TIMEOUT
            );
        }

        if was_ready {
            info!("Closed {}", self.shared.info.path);
        }
        result
    }
}

impl Drop for Monome {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Monome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monome")
            .field("id", &self.shared.id)
            .field("info", &self.shared.info)
            .field("state", &self.state())
            .field("rotation", &self.rotation())
            .finish()
    }
}
