//! 设备枚举
//!
//! 无状态查询：每次 `scan()` 都重新读取系统信息，不在调用之间保留句柄。
//!
//! - Linux：遍历 `/sys/class/tty`，沿设备链向上找到 USB 设备节点，
//!   读取 `idVendor` / `idProduct` / `serial`
//! - macOS：匹配 `/dev/tty.usbserial-*` 与 `/dev/tty.usbmodem*`，序列号取自路径
//!
//! monome 设备使用 FTDI 串口芯片（VID `0x0403`，PID `0x6001` / `0x6015`）。

use crate::TransportError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// FTDI 厂商 ID
pub const FTDI_VENDOR_ID: u16 = 0x0403;

/// 已知的 monome 产品 ID
pub const MONOME_PRODUCT_IDS: &[u16] = &[0x6001, 0x6015];

/// 可打开的设备描述
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceDescriptor {
    /// 设备节点路径（如 `/dev/ttyUSB0`）
    pub path: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    /// USB 序列号（如 `m1000123`）
    pub serial: Option<String>,
}

impl DeviceDescriptor {
    /// 只有路径的描述（序列号从路径推断）
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let serial = serial_from_path(&path);
        Self {
            path,
            vendor_id: None,
            product_id: None,
            serial,
        }
    }

    /// VID/PID 是否属于已知的 monome 签名；未知 VID/PID 时返回 `true`
    pub fn matches_signature(&self) -> bool {
        match (self.vendor_id, self.product_id) {
            (Some(vid), Some(pid)) => is_monome_usb(vid, pid),
            _ => true,
        }
    }
}

pub fn is_monome_usb(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == FTDI_VENDOR_ID && MONOME_PRODUCT_IDS.contains(&product_id)
}

/// 从 macOS 风格路径提取序列号
///
/// - `/dev/tty.usbmodem<serial>`：`usbmodem` 之后的部分
/// - `/dev/tty.usbserial-<serial>`：第一个 `-` 之后的部分
pub fn serial_from_path(path: &str) -> Option<String> {
    let serial = if let Some(idx) = path.find("usbmodem") {
        &path[idx + "usbmodem".len()..]
    } else {
        let idx = path.find('-')?;
        &path[idx + 1..]
    };
    (!serial.is_empty()).then(|| serial.to_string())
}

/// 设备枚举器
#[derive(Debug, Clone)]
pub struct Discovery {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
}

impl Default for Discovery {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/class/tty"),
            dev_root: PathBuf::from("/dev"),
        }
    }
}

impl Discovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定 sysfs 与 `/dev` 根目录（测试用）
    pub fn with_roots(sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
        }
    }

    /// 枚举已连接的 monome 设备，按路径排序
    pub fn scan(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let mut found = if cfg!(target_os = "macos") {
            self.scan_dev_names()?
        } else {
            self.scan_sysfs()?
        };
        found.retain(DeviceDescriptor::matches_signature);
        found.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Discovery found {} device(s)", found.len());
        Ok(found)
    }

    /// 以序列形式枚举；每次调用重新查询，失败时记录警告并返回空序列
    pub fn enumerate(&self) -> impl Iterator<Item = DeviceDescriptor> {
        self.scan()
            .inspect_err(|e| warn!("Device enumeration failed: {}", e))
            .unwrap_or_default()
            .into_iter()
    }

    /// Linux sysfs 枚举
    pub fn scan_sysfs(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let entries = match fs::read_dir(&self.sysfs_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = self.dev_root.join(&name).to_string_lossy().into_owned();
            // 没有 USB 标识的 tty（如 ttyS0）不是候选设备
            if let Some(descriptor) = self.usb_descriptor(&name, path) {
                found.push(descriptor);
            }
        }
        Ok(found)
    }

    /// 按设备路径查找描述（不打开设备）
    ///
    /// 路径先规范化（`/dev/serial/by-id/...` 等链接指向真实节点），再读取 sysfs 中
    /// 同名 tty 的 USB 父设备。没有 USB 信息时返回 `None`，序列号只能从路径推断。
    pub fn resolve(&self, path: &str) -> Option<DeviceDescriptor> {
        let node = fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path));
        let name = node.file_name()?.to_string_lossy().into_owned();
        let descriptor = self.usb_descriptor(&name, path.to_string())?;
        debug!("Resolved {} -> {:?}", path, descriptor.serial);
        Some(descriptor)
    }

    fn usb_descriptor(&self, tty: &str, path: String) -> Option<DeviceDescriptor> {
        let usb = find_usb_ancestor(&self.sysfs_root.join(tty).join("device"))?;
        let vendor_id = read_hex_attr(&usb, "idVendor")?;
        let product_id = read_hex_attr(&usb, "idProduct")?;
        let serial = read_attr(&usb, "serial");
        trace!("tty {} -> usb {:?} ({:?})", tty, usb, serial);
        Some(DeviceDescriptor {
            path,
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
            serial,
        })
    }

    /// macOS 设备名枚举
    pub fn scan_dev_names(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dev_root)?.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("tty.usbserial-") || name.starts_with("tty.usbmodem") {
                found.push(DeviceDescriptor::from_path(
                    self.dev_root.join(&name).to_string_lossy(),
                ));
            }
        }
        Ok(found)
    }
}

/// 从 tty 的 `device` 链接向上最多 4 级，找到含 `idVendor` 的 USB 设备目录
fn find_usb_ancestor(device_link: &Path) -> Option<PathBuf> {
    let mut dir = fs::canonicalize(device_link).ok()?;
    for _ in 0..4 {
        if dir.join("idVendor").is_file() {
            return Some(dir);
        }
        dir = dir.parent()?.to_path_buf();
    }
    None
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    let value = fs::read_to_string(dir.join(name)).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn read_hex_attr(dir: &Path, name: &str) -> Option<u16> {
    u16::from_str_radix(&read_attr(dir, name)?, 16).ok()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    /// 构造一个假的 sysfs：
    /// devices/usb1/1-1/{idVendor,idProduct,serial}/1-1:1.0/<tty>
    fn fake_usb_tty(root: &Path, tty: &str, vid: &str, pid: &str, serial: &str) {
        let usb = root.join("devices/usb1").join(format!("1-{tty}"));
        let iface = usb.join("1-1:1.0").join(tty);
        fs::create_dir_all(&iface).unwrap();
        fs::write(usb.join("idVendor"), format!("{vid}\n")).unwrap();
        fs::write(usb.join("idProduct"), format!("{pid}\n")).unwrap();
        fs::write(usb.join("serial"), format!("{serial}\n")).unwrap();

        let class = root.join("class/tty").join(tty);
        fs::create_dir_all(&class).unwrap();
        symlink(&iface, class.join("device")).unwrap();
    }

    #[test]
    fn test_serial_from_path() {
        assert_eq!(serial_from_path("/dev/tty.usbserial-m1000123").as_deref(), Some("m1000123"));
        assert_eq!(serial_from_path("/dev/tty.usbmodem14201").as_deref(), Some("14201"));
        assert_eq!(serial_from_path("/dev/ttyUSB0"), None);
        assert_eq!(serial_from_path("/dev/tty.usbserial-"), None);
    }

    #[test]
    fn test_signature() {
        assert!(is_monome_usb(0x0403, 0x6001));
        assert!(is_monome_usb(0x0403, 0x6015));
        assert!(!is_monome_usb(0x0403, 0x6010));
        assert!(!is_monome_usb(0x2341, 0x0043));
        assert!(DeviceDescriptor::from_path("/dev/tty.usbserial-m64-0001").matches_signature());
    }

    #[test]
    fn test_scan_fake_sysfs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fake_usb_tty(root, "ttyUSB0", "0403", "6001", "m1000123");
        fake_usb_tty(root, "ttyUSB1", "0403", "6015", "m0000456");
        fake_usb_tty(root, "ttyACM0", "2341", "0043", "arduino");
        // 没有 USB 父设备的串口
        fs::create_dir_all(root.join("class/tty/ttyS0")).unwrap();

        let discovery = Discovery::with_roots(root.join("class/tty"), "/dev");
        let mut found = discovery.scan_sysfs().unwrap();
        found.retain(DeviceDescriptor::matches_signature);
        found.sort_by(|a, b| a.path.cmp(&b.path));

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].path, "/dev/ttyUSB0");
        assert_eq!(found[0].serial.as_deref(), Some("m1000123"));
        assert_eq!(found[0].vendor_id, Some(0x0403));
        assert_eq!(found[1].product_id, Some(0x6015));
    }

    #[test]
    fn test_scan_is_restartable() {
        let tmp = tempfile::tempdir().unwrap();
        fake_usb_tty(tmp.path(), "ttyUSB0", "0403", "6001", "m64-0001");
        let discovery = Discovery::with_roots(tmp.path().join("class/tty"), "/dev");
        let first = discovery.scan_sysfs().unwrap();
        let second = discovery.scan_sysfs().unwrap();
        assert_eq!(first, second);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_enumerate_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        fake_usb_tty(tmp.path(), "ttyUSB1", "0403", "6001", "m128-0002");
        fake_usb_tty(tmp.path(), "ttyUSB0", "0403", "6015", "m1000001");
        fake_usb_tty(tmp.path(), "ttyACM0", "2341", "0043", "arduino");
        let discovery = Discovery::with_roots(tmp.path().join("class/tty"), "/dev");

        let paths: Vec<_> = discovery.enumerate().map(|d| d.path).collect();
        assert_eq!(paths, ["/dev/ttyUSB0", "/dev/ttyUSB1"]);
        // 设备拔出后重新枚举反映当前状态
        fs::remove_dir_all(tmp.path().join("class/tty/ttyUSB1")).unwrap();
        assert_eq!(discovery.enumerate().count(), 1);
    }

    #[test]
    fn test_resolve_by_path() {
        let tmp = tempfile::tempdir().unwrap();
        fake_usb_tty(tmp.path(), "ttyUSB3", "0403", "6001", "a40h-0007");
        let discovery = Discovery::with_roots(tmp.path().join("class/tty"), "/dev");

        let found = discovery.resolve("/dev/ttyUSB3").unwrap();
        assert_eq!(found.path, "/dev/ttyUSB3");
        assert_eq!(found.serial.as_deref(), Some("a40h-0007"));
        assert_eq!((found.vendor_id, found.product_id), (Some(0x0403), Some(0x6001)));

        assert!(discovery.resolve("/dev/ttyUSB9").is_none());
        assert!(discovery.resolve("/").is_none());
    }

    #[test]
    fn test_missing_sysfs_is_empty() {
        let discovery = Discovery::with_roots("/nonexistent/sys/class/tty", "/dev");
        assert!(discovery.scan_sysfs().unwrap().is_empty());
    }

    #[test]
    fn test_scan_dev_names() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["tty.usbserial-m128-0042", "tty.usbmodem1411", "tty.Bluetooth", "cu.usbserial-x"] {
            fs::write(tmp.path().join(name), "").unwrap();
        }
        let discovery = Discovery::with_roots("/nonexistent", tmp.path());
        let mut found = discovery.scan_dev_names().unwrap();
        found.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].serial.as_deref(), Some("1411"));
        assert_eq!(found[1].serial.as_deref(), Some("m128-0042"));
    }
}
