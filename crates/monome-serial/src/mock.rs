//! 模拟设备
//!
//! `MockDevice` 在内存中模拟一台 grid / arc：
//! - 用设备侧编解码器解析主机写入的字节，维护 LED 状态
//! - mext 变体会应答 ID / 尺寸 / 能力查询
//! - 测试可以注入输入事件、模拟拔出、关闭应答
//! - 同一时间只允许一个打开者，重复打开返回 `Busy`

use crate::discovery::{DeviceDescriptor, FTDI_VENDOR_ID, MONOME_PRODUCT_IDS};
use crate::{
    RxTransport, SplittableTransport, Transport, TransportDeviceError, TransportDeviceErrorKind,
    TransportError, TxTransport,
};
use monome_protocol::{
    Bounds, Codec, Command, DeviceCodec, Event, GridSize, MAX_LEVEL, Outbound, ProtocolVariant,
    Query, RING_LEDS, SystemReply, section,
};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// 模拟设备的静态配置
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub variant: ProtocolVariant,
    pub serial: String,
    /// 物理网格尺寸（arc 为 0x0）
    pub grid: GridSize,
    pub rings: u8,
    pub tilt_sensors: u8,
    /// 设备节点路径；为空时使用 macOS 风格的 `/dev/tty.usbserial-<serial>`
    pub path: Option<String>,
}

impl MockConfig {
    fn bounds(&self) -> Bounds {
        Bounds {
            grid: self.grid,
            rings: self.rings,
            tilt_sensors: self.tilt_sensors,
        }
    }
}

#[derive(Debug)]
struct MockState {
    open: bool,
    disconnected: bool,
    responsive: bool,
    /// 之后这么多次写入返回 IO 错误
    failing_writes: usize,
    /// 设备 -> 主机
    rx_queue: VecDeque<u8>,
    /// 主机 -> 设备，尚未构成完整消息的字节
    tx_pending: Vec<u8>,
    written: Vec<u8>,
    commands: Vec<Command>,
    leds: Vec<u8>,
    rings: Vec<[u8; 64]>,
    intensity: u8,
    tilt_enabled: Vec<bool>,
}

impl MockState {
    fn new(config: &MockConfig) -> Self {
        Self {
            open: false,
            disconnected: false,
            responsive: true,
            failing_writes: 0,
            rx_queue: VecDeque::new(),
            tx_pending: Vec::new(),
            written: Vec::new(),
            commands: Vec::new(),
            leds: vec![0; config.grid.cell_count()],
            rings: vec![[0; 64]; config.rings as usize],
            intensity: MAX_LEVEL,
            tilt_enabled: vec![false; config.tilt_sensors as usize],
        }
    }

    fn set_cell(&mut self, grid: GridSize, x: u8, y: u8, level: u8) {
        if grid.contains(x, y) {
            self.leds[y as usize * grid.cols as usize + x as usize] = level;
        }
    }

    fn set_ring(&mut self, ring: u8, led: u8, level: u8) {
        if let Some(r) = self.rings.get_mut(ring as usize)
            && led < RING_LEDS
        {
            r[led as usize] = level;
        }
    }

    /// 把指令作用到模拟的 LED 状态上
    fn apply(&mut self, grid: GridSize, cmd: &Command) {
        let bit = |data: u8, i: u8| if data & (1 << i) != 0 { MAX_LEVEL } else { 0 };
        match *cmd {
            Command::LedSet { x, y, on } => self.set_cell(grid, x, y, if on { MAX_LEVEL } else { 0 }),
            Command::LedAll { on } => self.leds.fill(if on { MAX_LEVEL } else { 0 }),
            Command::LedMap { x_off, y_off, rows } => {
                for (dy, data) in (0u8..).zip(rows) {
                    for dx in 0..8 {
                        self.set_cell(grid, x_off + dx, y_off + dy, bit(data, dx));
                    }
                }
            },
            Command::LedRow { x_off, y, data } => {
                for dx in 0..8 {
                    self.set_cell(grid, x_off + dx, y, bit(data, dx));
                }
            },
            Command::LedCol { x, y_off, data } => {
                for dy in 0..8 {
                    self.set_cell(grid, x, y_off + dy, bit(data, dy));
                }
            },
            Command::Intensity { level } => self.intensity = level,
            Command::LevelSet { x, y, level } => self.set_cell(grid, x, y, level),
            Command::LevelAll { level } => self.leds.fill(level),
            Command::LevelMap {
                x_off,
                y_off,
                ref levels,
            } => {
                for (i, &level) in (0u8..).zip(levels.iter()) {
                    self.set_cell(grid, x_off + i % 8, y_off + i / 8, level);
                }
            },
            Command::LevelRow { x_off, y, levels } => {
                for (dx, level) in (0u8..).zip(levels) {
                    self.set_cell(grid, x_off + dx, y, level);
                }
            },
            Command::LevelCol { x, y_off, levels } => {
                for (dy, level) in (0u8..).zip(levels) {
                    self.set_cell(grid, x, y_off + dy, level);
                }
            },
            Command::RingSet { ring, led, level } => self.set_ring(ring, led, level),
            Command::RingAll { ring, level } => {
                if let Some(r) = self.rings.get_mut(ring as usize) {
                    r.fill(level);
                }
            },
            Command::RingMap { ring, levels } => {
                if let Some(r) = self.rings.get_mut(ring as usize) {
                    *r = levels;
                }
            },
            Command::RingRange {
                ring,
                start,
                end,
                level,
            } => {
                let mut led = start % RING_LEDS;
                loop {
                    self.set_ring(ring, led, level);
                    if led == end % RING_LEDS {
                        break;
                    }
                    led = (led + 1) % RING_LEDS;
                }
            },
            Command::TiltEnable { sensor } | Command::TiltDisable { sensor } => {
                let enabled = matches!(cmd, Command::TiltEnable { .. });
                if let Some(t) = self.tilt_enabled.get_mut(sensor as usize) {
                    *t = enabled;
                }
            },
            Command::SetRotation(_) => {},
        }
        self.commands.push(cmd.clone());
    }
}

#[derive(Debug)]
struct MockInner {
    config: MockConfig,
    codec: Codec,
    state: Mutex<MockState>,
    readable: Condvar,
}

impl MockInner {
    fn push_rx(&self, bytes: &[u8]) {
        let mut state = self.state.lock();
        state.rx_queue.extend(bytes.iter().copied());
        self.readable.notify_all();
    }

    fn replies_for(&self, query: Query) -> Vec<SystemReply> {
        let cfg = &self.config;
        match query {
            Query::Id => vec![SystemReply::Id(cfg.serial.clone())],
            Query::GridSize => vec![SystemReply::GridSize {
                cols: cfg.grid.cols,
                rows: cfg.grid.rows,
            }],
            Query::System => {
                let mut replies = Vec::new();
                if !cfg.grid.is_empty() {
                    replies.push(SystemReply::Query {
                        section: section::LED_GRID,
                        count: 1,
                    });
                    replies.push(SystemReply::Query {
                        section: section::KEY_GRID,
                        count: 1,
                    });
                }
                if cfg.rings > 0 {
                    replies.push(SystemReply::Query {
                        section: section::ENCODER,
                        count: cfg.rings,
                    });
                    replies.push(SystemReply::Query {
                        section: section::LED_RING,
                        count: cfg.rings,
                    });
                }
                if cfg.tilt_sensors > 0 {
                    replies.push(SystemReply::Query {
                        section: section::TILT,
                        count: cfg.tilt_sensors,
                    });
                }
                replies
            },
        }
    }

    /// 处理主机写入：解码、更新 LED 状态、生成应答
    fn handle_write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(TransportError::Disconnected);
        }
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(TransportError::Io(std::io::Error::other("mock write failure")));
        }
        state.written.extend_from_slice(bytes);
        state.tx_pending.extend_from_slice(bytes);

        let decoded = self.codec.decode_command(&state.tx_pending);
        state.tx_pending.drain(..decoded.consumed);

        let mut replies = Vec::new();
        for msg in decoded.messages {
            match msg {
                Outbound::Command(cmd) => state.apply(self.config.grid, &cmd),
                Outbound::Query(query) if state.responsive => replies.extend(self.replies_for(query)),
                Outbound::Query(query) => trace!("mock device ignoring {:?}", query),
                Outbound::Unknown(op) => warn!("mock device got unknown opcode 0x{:02X}", op),
            }
        }
        for reply in replies {
            match self.codec.encode_reply(&reply) {
                Ok(bytes) => state.rx_queue.extend(bytes),
                Err(e) => warn!("mock device cannot encode reply: {}", e),
            }
        }
        self.readable.notify_all();
        Ok(())
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.disconnected {
                return Err(TransportError::Disconnected);
            }
            if !state.rx_queue.is_empty() {
                let n = buf.len().min(state.rx_queue.len());
                for (slot, byte) in buf.iter_mut().zip(state.rx_queue.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if self.readable.wait_until(&mut state, deadline).timed_out() {
                return Err(TransportError::Timeout);
            }
        }
    }
}

/// 模拟设备（可克隆，所有克隆共享同一台设备）
#[derive(Debug, Clone)]
pub struct MockDevice {
    inner: Arc<MockInner>,
}

impl MockDevice {
    pub fn new(config: MockConfig) -> Self {
        let codec = Codec::with_bounds(config.variant, config.bounds());
        let state = MockState::new(&config);
        Self {
            inner: Arc::new(MockInner {
                config,
                codec,
                state: Mutex::new(state),
                readable: Condvar::new(),
            }),
        }
    }

    /// grid 设备（带一个倾斜传感器）
    pub fn grid(variant: ProtocolVariant, grid: GridSize, serial: impl Into<String>) -> Self {
        Self::new(MockConfig {
            variant,
            serial: serial.into(),
            grid,
            rings: 0,
            tilt_sensors: 1,
            path: None,
        })
    }

    /// mext arc 设备
    pub fn arc(rings: u8, serial: impl Into<String>) -> Self {
        Self::new(MockConfig {
            variant: ProtocolVariant::Mext,
            serial: serial.into(),
            grid: GridSize::new(0, 0),
            rings,
            tilt_sensors: 0,
            path: None,
        })
    }

    pub fn config(&self) -> &MockConfig {
        &self.inner.config
    }

    /// 换一个设备节点路径（如 `/dev/ttyUSB0`，序列号无法从中推断）
    pub fn with_path(self, path: impl Into<String>) -> Self {
        let mut config = self.inner.config.clone();
        config.path = Some(path.into());
        Self::new(config)
    }

    /// 设备节点路径
    pub fn path(&self) -> String {
        match &self.inner.config.path {
            Some(path) => path.clone(),
            None => format!("/dev/tty.usbserial-{}", self.inner.config.serial),
        }
    }

    /// 与枚举结果等价的描述（带 FTDI 签名与序列号）
    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            path: self.path(),
            vendor_id: Some(FTDI_VENDOR_ID),
            product_id: Some(MONOME_PRODUCT_IDS[0]),
            serial: Some(self.inner.config.serial.clone()),
        }
    }

    /// 打开设备；已被打开时返回 `Busy`
    pub fn open(&self) -> Result<MockTransport, TransportError> {
        let mut state = self.inner.state.lock();
        if state.disconnected {
            return Err(TransportError::Device(TransportDeviceError::new(
                TransportDeviceErrorKind::NotFound,
                format!("{} is unplugged", self.path()),
            )));
        }
        if state.open {
            return Err(TransportError::Device(TransportDeviceError::new(
                TransportDeviceErrorKind::Busy,
                format!("{} is already open", self.path()),
            )));
        }
        state.open = true;
        drop(state);

        Ok(MockTransport {
            path: self.path(),
            guard: Some(Arc::new(OpenGuard {
                inner: self.inner.clone(),
            })),
        })
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().open
    }

    /// 注入一个输入事件（按设备协议编码）
    pub fn inject_event(&self, event: &Event) {
        match self.inner.codec.encode_event(event) {
            Ok(bytes) => self.inner.push_rx(&bytes),
            Err(e) => warn!("mock device cannot encode {:?}: {}", event, e),
        }
    }

    /// 注入原始字节
    pub fn inject_bytes(&self, bytes: &[u8]) {
        self.inner.push_rx(bytes);
    }

    pub fn press(&self, x: u8, y: u8) {
        self.inject_event(&Event::ButtonDown { x, y });
    }

    pub fn release(&self, x: u8, y: u8) {
        self.inject_event(&Event::ButtonUp { x, y });
    }

    /// 模拟拔出：后续读写均返回 `Disconnected`，阻塞的读立即返回
    pub fn disconnect(&self) {
        let mut state = self.inner.state.lock();
        state.disconnected = true;
        self.inner.readable.notify_all();
    }

    /// 关闭后设备不再应答系统查询（用于识别超时）
    pub fn set_responsive(&self, responsive: bool) {
        self.inner.state.lock().responsive = responsive;
    }

    /// 接下来 `count` 次写入失败（设备保持连接）
    pub fn fail_writes(&self, count: usize) {
        self.inner.state.lock().failing_writes = count;
    }

    /// 物理坐标的等级
    pub fn level(&self, x: u8, y: u8) -> u8 {
        let grid = self.inner.config.grid;
        if !grid.contains(x, y) {
            return 0;
        }
        self.inner.state.lock().leds[y as usize * grid.cols as usize + x as usize]
    }

    /// 全部等级（行优先，物理坐标）
    pub fn levels(&self) -> Vec<u8> {
        self.inner.state.lock().leds.clone()
    }

    /// 一行前 8 个单元的位图（LSB = x0），等级 > 0 视为点亮
    pub fn row_bits(&self, y: u8) -> u8 {
        (0..8u8).fold(0, |mask, x| mask | (((self.level(x, y) > 0) as u8) << x))
    }

    pub fn ring(&self, ring: u8) -> Option<[u8; 64]> {
        self.inner.state.lock().rings.get(ring as usize).copied()
    }

    pub fn intensity(&self) -> u8 {
        self.inner.state.lock().intensity
    }

    pub fn tilt_enabled(&self, sensor: u8) -> bool {
        self.inner
            .state
            .lock()
            .tilt_enabled
            .get(sensor as usize)
            .copied()
            .unwrap_or(false)
    }

    /// 已收到的指令（按到达顺序）
    pub fn commands(&self) -> Vec<Command> {
        self.inner.state.lock().commands.clone()
    }

    /// 主机写入的原始字节
    pub fn written_bytes(&self) -> Vec<u8> {
        self.inner.state.lock().written.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.inner.state.lock();
        state.written.clear();
        state.commands.clear();
    }
}

/// 打开状态守卫：所有半部释放后设备才回到可打开状态
#[derive(Debug)]
struct OpenGuard {
    inner: Arc<MockInner>,
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.inner.state.lock().open = false;
        trace!("mock device {} released", self.inner.config.serial);
    }
}

/// 模拟设备的传输
#[derive(Debug)]
pub struct MockTransport {
    path: String,
    guard: Option<Arc<OpenGuard>>,
}

impl MockTransport {
    fn inner(&self) -> Result<&Arc<MockInner>, TransportError> {
        self.guard
            .as_ref()
            .map(|g| &g.inner)
            .ok_or(TransportError::Closed)
    }
}

impl Transport for MockTransport {
    fn path(&self) -> &str {
        &self.path
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.inner()?.handle_write(bytes)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.inner()?.read(buf, timeout)
    }

    fn close(&mut self) {
        self.guard.take();
    }

    fn is_open(&self) -> bool {
        self.guard.is_some()
    }
}

/// 只读半部
#[derive(Debug)]
pub struct MockRx {
    guard: Arc<OpenGuard>,
}

/// 只写半部
#[derive(Debug)]
pub struct MockTx {
    guard: Arc<OpenGuard>,
}

impl RxTransport for MockRx {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.guard.inner.read(buf, timeout)
    }
}

impl TxTransport for MockTx {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.guard.inner.handle_write(bytes)
    }
}

impl SplittableTransport for MockTransport {
    type Rx = MockRx;
    type Tx = MockTx;

    fn split(mut self) -> Result<(Self::Rx, Self::Tx), TransportError> {
        let guard = self.guard.take().ok_or(TransportError::Closed)?;
        Ok((
            MockRx {
                guard: guard.clone(),
            },
            MockTx { guard },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_open_is_busy() {
        let device = MockDevice::grid(ProtocolVariant::Series, GridSize::new(8, 8), "m64-0001");
        let mut first = device.open().unwrap();
        let err = device.open().unwrap_err();
        assert_eq!(err.device_kind(), Some(TransportDeviceErrorKind::Busy));

        first.close();
        first.close();
        assert!(!device.is_open());
        assert!(device.open().is_ok());
    }

    #[test]
    fn test_split_keeps_device_open_until_both_dropped() {
        let device = MockDevice::grid(ProtocolVariant::FortyH, GridSize::new(8, 8), "m40h0001");
        let (rx, tx) = device.open().unwrap().split().unwrap();
        drop(rx);
        assert!(device.is_open());
        drop(tx);
        assert!(!device.is_open());
    }

    #[test]
    fn test_writes_update_leds() {
        let device = MockDevice::grid(ProtocolVariant::FortyH, GridSize::new(8, 8), "m40h0001");
        let mut t = device.open().unwrap();
        t.write_all(&[0x70, 0xFF, 0x21]).unwrap();
        assert_eq!(device.row_bits(0), 0xFF);
        // 不完整的消息暂存，补齐后生效
        t.write_all(&[0x35]).unwrap();
        assert_eq!(device.level(3, 5), MAX_LEVEL);
        assert_eq!(device.written_bytes(), vec![0x70, 0xFF, 0x21, 0x35]);
    }

    #[test]
    fn test_mext_queries_answered() {
        let device = MockDevice::grid(ProtocolVariant::Mext, GridSize::new(16, 8), "m1000123");
        let mut t = device.open().unwrap();
        t.write_all(&[0x01, 0x05]).unwrap();

        let mut buf = [0u8; 64];
        let n = t.read(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(n, 33 + 3);
        assert_eq!(&buf[1..9], b"m1000123");
        assert_eq!(&buf[33..36], &[0x03, 16, 8]);
    }

    #[test]
    fn test_unresponsive_device_times_out() {
        let device = MockDevice::grid(ProtocolVariant::Mext, GridSize::new(8, 8), "m1");
        device.set_responsive(false);
        let mut t = device.open().unwrap();
        t.write_all(&[0x01]).unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(
            t.read(&mut buf, Duration::from_millis(5)),
            Err(TransportError::Timeout)
        ));
    }

    #[test]
    fn test_disconnect_wakes_reader() {
        let device = MockDevice::grid(ProtocolVariant::Series, GridSize::new(8, 8), "m64-1");
        let (mut rx, _tx) = device.open().unwrap().split().unwrap();
        let d = device.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            d.disconnect();
        });
        let mut buf = [0u8; 8];
        let start = Instant::now();
        let result = rx.read(&mut buf, Duration::from_secs(5));
        assert!(matches!(result, Err(TransportError::Disconnected)));
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn test_ring_range_wraps() {
        let device = MockDevice::arc(2, "m0000001");
        let mut t = device.open().unwrap();
        t.write_all(&[0x93, 1, 62, 1, 9]).unwrap();
        let ring = device.ring(1).unwrap();
        assert_eq!(ring[62], 9);
        assert_eq!(ring[63], 9);
        assert_eq!(ring[0], 9);
        assert_eq!(ring[1], 9);
        assert_eq!(ring[2], 0);
        assert_eq!(device.ring(0).unwrap(), [0; 64]);
    }

    #[test]
    fn test_injected_event_is_readable() {
        let device = MockDevice::grid(ProtocolVariant::Mext, GridSize::new(8, 8), "m1");
        device.press(2, 3);
        let mut t = device.open().unwrap();
        let mut buf = [0u8; 8];
        let n = t.read(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(&buf[..n], &[0x21, 2, 3]);
    }
}
