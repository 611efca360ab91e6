//! Builder 模式实现
//!
//! 提供链式构造 `Monome` 会话的便捷方式。

use crate::config::SessionConfig;
use crate::error::MonomeError;
use crate::session::Monome;
use monome_protocol::Rotation;
use monome_serial::{DeviceDescriptor, Discovery, SplittableTransport};
use std::time::Duration;

/// Monome Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use monome_driver::MonomeBuilder;
/// use std::time::Duration;
///
/// // 打开第一个枚举到的设备
/// let grid = MonomeBuilder::new().build()?;
///
/// // 指定设备与配置
/// let grid = MonomeBuilder::new()
///     .device("/dev/ttyUSB0")
///     .auto_flush(true)
///     .identify_timeout(Duration::from_secs(1))
///     .build()?;
/// # Ok::<(), monome_driver::MonomeError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MonomeBuilder {
    /// 设备路径；为空时使用描述中的路径，再为空时枚举
    path: Option<String>,
    /// 枚举得到的描述（其序列号用于识别）
    descriptor: Option<DeviceDescriptor>,
    /// 未提供描述时按路径查找 USB 信息
    discovery: Discovery,
    config: SessionConfig,
    rotation: Rotation,
}

impl MonomeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设备路径（如 `/dev/ttyUSB0`）
    pub fn device(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// 使用枚举结果（路径 + 序列号）
    pub fn descriptor(mut self, descriptor: DeviceDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// 设备查询使用的枚举器（默认读取系统 sysfs）
    pub fn discovery(mut self, discovery: Discovery) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// 绘制后立即写出受影响的区域
    pub fn auto_flush(mut self, enabled: bool) -> Self {
        self.config.auto_flush = enabled;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn identify_timeout(mut self, timeout: Duration) -> Self {
        self.config.identify_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn flush_on_close(mut self, enabled: bool) -> Self {
        self.config.flush_on_close = enabled;
        self
    }

    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    /// 初始旋转方向（只对 grid 有效）
    pub fn rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// 打开串口设备并建立会话
    ///
    /// 波特率由型号表决定（序列号未知时使用默认值）。
    #[cfg(unix)]
    pub fn build(self) -> Result<Monome, MonomeError> {
        use crate::identify::known_model;
        use monome_protocol::DEFAULT_BAUD_RATE;
        use monome_serial::TtyTransport;
        use tracing::debug;

        // 显式路径优先于描述中的路径；只有路径时按路径查找序列号
        let (path, descriptor) = match (self.path, self.descriptor) {
            (Some(path), Some(descriptor)) => (path, Some(descriptor)),
            (Some(path), None) => {
                let descriptor = self.discovery.resolve(&path);
                (path, descriptor)
            },
            (None, Some(descriptor)) => (descriptor.path.clone(), Some(descriptor)),
            (None, None) => {
                let descriptor = self
                    .discovery
                    .scan()?
                    .into_iter()
                    .next()
                    .ok_or_else(|| MonomeError::NotFound("no monome device attached".into()))?;
                (descriptor.path.clone(), Some(descriptor))
            },
        };

        let baud_rate = known_model(&path, descriptor.as_ref())?
            .map(|model| model.baud_rate)
            .unwrap_or(DEFAULT_BAUD_RATE);
        debug!("Opening {} at {} baud", path, baud_rate);

        let transport = TtyTransport::open_with_baud(path, baud_rate)?;
        Monome::with_transport(transport, descriptor.as_ref(), self.config, self.rotation)
    }

    /// 在给定传输上建立会话（模拟设备、自定义传输）
    ///
    /// 未提供描述时按传输路径查找。
    pub fn build_with<T: SplittableTransport>(self, transport: T) -> Result<Monome, MonomeError> {
        let descriptor = match self.descriptor {
            Some(descriptor) => Some(descriptor),
            None => self.discovery.resolve(transport.path()),
        };
        Monome::with_transport(transport, descriptor.as_ref(), self.config, self.rotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monome_protocol::{Command, GridSize, ProtocolVariant};
    use monome_serial::mock::MockDevice;

    #[test]
    fn test_builder_setters() {
        let builder = MonomeBuilder::new()
            .device("/dev/ttyUSB3")
            .auto_flush(true)
            .read_timeout(Duration::from_millis(25))
            .identify_timeout(Duration::from_secs(2))
            .flush_on_close(false)
            .event_channel_capacity(8)
            .rotation(Rotation::R270);
        assert_eq!(builder.path.as_deref(), Some("/dev/ttyUSB3"));
        assert!(builder.config.auto_flush);
        assert_eq!(builder.config.read_timeout_ms, 25);
        assert_eq!(builder.config.identify_timeout_ms, 2000);
        assert!(!builder.config.flush_on_close);
        assert_eq!(builder.config.event_channel_capacity, 8);
        assert_eq!(builder.rotation, Rotation::R270);
    }

    #[test]
    fn test_build_with_mock() {
        let device = MockDevice::grid(ProtocolVariant::Mext, GridSize::new(16, 16), "m1000200");
        let grid = MonomeBuilder::new()
            .descriptor(device.descriptor())
            .auto_flush(true)
            .rotation(Rotation::R90)
            .build_with(device.open().unwrap())
            .unwrap();

        assert_eq!(grid.serial(), "m1000200");
        assert_eq!(grid.protocol(), "mext");
        assert_eq!(grid.rotation(), Rotation::R90);
        grid.draw(&Command::LevelAll { level: 4 }).unwrap();
        assert!(device.levels().iter().all(|&l| l == 4));
    }

    /// 没有描述：序列号取自 macOS 风格的设备路径
    #[test]
    fn test_series_from_platform_path() {
        let device = MockDevice::grid(ProtocolVariant::Series, GridSize::new(8, 8), "m64-0001");
        let grid = MonomeBuilder::new()
            .identify_timeout(Duration::from_millis(100))
            .build_with(device.open().unwrap())
            .unwrap();
        assert_eq!(grid.protocol(), "series");
        assert_eq!(grid.serial(), "m64-0001");
        assert_eq!((grid.cols(), grid.rows()), (8, 8));
    }

    /// 没有描述、路径中也没有序列号：从 sysfs 按路径查到 USB 序列号
    #[cfg(target_os = "linux")]
    #[test]
    fn test_series_resolved_through_sysfs() {
        use std::fs;
        use std::os::unix::fs::symlink;

        let tmp = tempfile::tempdir().unwrap();
        let usb = tmp.path().join("devices/usb1/1-2");
        let iface = usb.join("1-2:1.0/ttyUSB7");
        fs::create_dir_all(&iface).unwrap();
        fs::write(usb.join("idVendor"), "0403\n").unwrap();
        fs::write(usb.join("idProduct"), "6001\n").unwrap();
        fs::write(usb.join("serial"), "m128-0031\n").unwrap();
        let class = tmp.path().join("class/tty/ttyUSB7");
        fs::create_dir_all(&class).unwrap();
        symlink(&iface, class.join("device")).unwrap();
        let discovery = Discovery::with_roots(tmp.path().join("class/tty"), "/dev");

        let device = MockDevice::grid(ProtocolVariant::Series, GridSize::new(16, 8), "m128-0031")
            .with_path("/dev/ttyUSB7");
        let grid = MonomeBuilder::new()
            .discovery(discovery)
            .identify_timeout(Duration::from_millis(100))
            .build_with(device.open().unwrap())
            .unwrap();
        assert_eq!(grid.path(), "/dev/ttyUSB7");
        assert_eq!(grid.serial(), "m128-0031");
        assert_eq!(grid.info().vendor_id, Some(0x0403));
        assert_eq!((grid.cols(), grid.rows()), (16, 8));
        // 旧协议识别不与设备通信
        assert!(device.written_bytes().is_empty());
    }

    #[test]
    fn test_unresolvable_series_times_out() {
        let device = MockDevice::grid(ProtocolVariant::Series, GridSize::new(8, 8), "m64-0002")
            .with_path("/dev/monome-unresolvable");
        let err = MonomeBuilder::new()
            .discovery(Discovery::with_roots("/nonexistent/sys/class/tty", "/dev"))
            .identify_timeout(Duration::from_millis(40))
            .build_with(device.open().unwrap())
            .unwrap_err();
        assert!(matches!(err, MonomeError::ProtocolTimeout { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_build_missing_device() {
        let err = MonomeBuilder::new()
            .device("/dev/monome-does-not-exist")
            .build()
            .unwrap_err();
        assert!(matches!(err, MonomeError::NotFound(_)));
    }
}
