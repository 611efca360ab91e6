//! unix 串口传输
//!
//! ## 打开流程
//!
//! 1. `open(O_RDWR | O_NOCTTY)`
//! 2. `flock(LOCK_EX | LOCK_NB)` 独占设备，已被占用时返回 `Busy`
//! 3. termios 原始模式 8N1，默认 115200 波特
//!
//! ## 读超时
//!
//! 使用 `poll(2)` 实现；`POLLHUP` / `POLLERR` 或读到 EOF 视为设备断开。
//!
//! # ⚠️ 分离后的共享状态
//!
//! `split()` 通过 `dup()` 复制文件描述符，两个半部共享同一个“打开文件描述”：
//! `O_NONBLOCK` 等标志与 `flock` 锁都是共享的。锁在两个半部都关闭后才释放。
//! 严禁在任一半部上切换非阻塞模式，超时只能依赖 `poll`。

use crate::{
    RxTransport, SplittableTransport, Transport, TransportDeviceError, TransportDeviceErrorKind,
    TransportError, TxTransport,
};
use fs4::fs_std::FileExt;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::{
    BaudRate, ControlFlags, SetArg, SpecialCharacterIndices, cfmakeraw, cfsetspeed, tcgetattr,
    tcsetattr,
};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// 默认波特率
pub const DEFAULT_BAUD_RATE: u32 = monome_protocol::DEFAULT_BAUD_RATE;

/// 串口传输
#[derive(Debug)]
pub struct TtyTransport {
    /// `None` 表示已关闭
    file: Option<File>,
    path: String,
    baud_rate: u32,
}

impl TtyTransport {
    /// 以默认波特率打开设备
    pub fn open(path: impl Into<String>) -> Result<Self, TransportError> {
        Self::open_with_baud(path, DEFAULT_BAUD_RATE)
    }

    /// 打开设备并配置波特率
    ///
    /// # 错误
    /// - `Device(NotFound)`: 设备节点不存在
    /// - `Device(PermissionDenied)`: 无权限（通常需要 `dialout` 组）
    /// - `Device(Busy)`: 其它进程或会话已持有独占锁
    /// - `Device(UnsupportedConfig)`: 波特率不受支持
    pub fn open_with_baud(path: impl Into<String>, baud_rate: u32) -> Result<Self, TransportError> {
        let path = path.into();
        let baud = baud_from_u32(baud_rate)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&path)
            .map_err(|e| open_error(&path, e))?;

        lock_exclusive(&file, &path)?;
        configure_raw(&file, baud).map_err(|e| {
            TransportError::Device(TransportDeviceError::new(
                TransportDeviceErrorKind::UnsupportedConfig,
                format!("Failed to configure '{}': {}", path, e),
            ))
        })?;

        debug!("Opened serial device '{}' at {} baud", path, baud_rate);
        Ok(Self {
            file: Some(file),
            path,
            baud_rate,
        })
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn file(&mut self) -> Result<&mut File, TransportError> {
        self.file.as_mut().ok_or(TransportError::Closed)
    }
}

fn baud_from_u32(baud_rate: u32) -> Result<BaudRate, TransportError> {
    match baud_rate {
        9600 => Ok(BaudRate::B9600),
        19200 => Ok(BaudRate::B19200),
        38400 => Ok(BaudRate::B38400),
        57600 => Ok(BaudRate::B57600),
        115200 => Ok(BaudRate::B115200),
        230400 => Ok(BaudRate::B230400),
        other => Err(TransportError::Device(TransportDeviceError::new(
            TransportDeviceErrorKind::UnsupportedConfig,
            format!("Unsupported baud rate: {}", other),
        ))),
    }
}

fn open_error(path: &str, e: std::io::Error) -> TransportError {
    let kind = match e.kind() {
        ErrorKind::NotFound => TransportDeviceErrorKind::NotFound,
        ErrorKind::PermissionDenied => TransportDeviceErrorKind::PermissionDenied,
        _ => match e.raw_os_error() {
            Some(libc::ENXIO) | Some(libc::ENODEV) => TransportDeviceErrorKind::NotFound,
            Some(libc::EBUSY) => TransportDeviceErrorKind::Busy,
            _ => return TransportError::Io(e),
        },
    };
    TransportError::Device(TransportDeviceError::new(
        kind,
        format!("Failed to open '{}': {}", path, e),
    ))
}

/// 设备级独占锁，与同一设备的其它打开者互斥
///
/// 锁跟随打开文件描述：`dup()` 出的半部全部关闭后才释放。
fn lock_exclusive(file: &File, path: &str) -> Result<(), TransportError> {
    if !file.try_lock_exclusive()? {
        return Err(TransportError::Device(TransportDeviceError::new(
            TransportDeviceErrorKind::Busy,
            format!("'{}' is already opened by another session", path),
        )));
    }
    Ok(())
}

fn configure_raw(file: &File, baud: BaudRate) -> nix::Result<()> {
    let mut termios = tcgetattr(file)?;
    cfmakeraw(&mut termios);
    cfsetspeed(&mut termios, baud)?;
    termios.control_flags |= ControlFlags::CS8 | ControlFlags::CLOCAL | ControlFlags::CREAD;
    termios.control_flags &= !(ControlFlags::PARENB | ControlFlags::CSTOPB | ControlFlags::CRTSCTS);
    // 阻塞由 poll 控制，read 有数据即返回
    termios.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    termios.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
    tcsetattr(file, SetArg::TCSANOW, &termios)
}

/// poll + read
fn read_with_timeout(file: &mut File, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
    let revents = {
        let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
        let timeout_ms = timeout.as_millis().min(65535) as u16;
        match poll(&mut fds, PollTimeout::from(timeout_ms)) {
            Ok(0) => return Err(TransportError::Timeout),
            Ok(_) => fds[0].revents().unwrap_or(PollFlags::empty()),
            Err(nix::errno::Errno::EINTR) => return Err(TransportError::Timeout),
            Err(e) => {
                return Err(TransportError::Io(std::io::Error::other(format!(
                    "poll failed: {}",
                    e
                ))));
            },
        }
    };

    if !revents.contains(PollFlags::POLLIN)
        && revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL)
    {
        return Err(TransportError::Disconnected);
    }

    match file.read(buf) {
        Ok(0) => Err(TransportError::Disconnected),
        Ok(n) => {
            trace!("serial rx {} bytes", n);
            Ok(n)
        },
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
            Err(TransportError::Timeout)
        },
        Err(e) => Err(io_to_transport(e)),
    }
}

fn write_all(file: &mut File, bytes: &[u8]) -> Result<(), TransportError> {
    file.write_all(bytes).map_err(io_to_transport)?;
    trace!("serial tx {} bytes", bytes.len());
    Ok(())
}

/// 设备拔出时内核返回的错误统一映射为 `Disconnected`
fn io_to_transport(e: std::io::Error) -> TransportError {
    match e.raw_os_error() {
        Some(libc::EIO) | Some(libc::ENXIO) | Some(libc::ENODEV) | Some(libc::EPIPE) => {
            TransportError::Disconnected
        },
        _ if e.kind() == ErrorKind::BrokenPipe => TransportError::Disconnected,
        _ => TransportError::Io(e),
    }
}

impl Transport for TtyTransport {
    fn path(&self) -> &str {
        &self.path
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        write_all(self.file()?, bytes)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        read_with_timeout(self.file()?, buf, timeout)
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed serial device '{}'", self.path);
        }
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for TtyTransport {
    fn drop(&mut self) {
        if self.file.is_some() {
            trace!("[Auto-Drop] serial device '{}' closed", self.path);
        }
    }
}

/// 只读半部
#[derive(Debug)]
pub struct TtyRxTransport {
    file: File,
    path: String,
}

/// 只写半部
#[derive(Debug)]
pub struct TtyTxTransport {
    file: File,
}

impl RxTransport for TtyRxTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        read_with_timeout(&mut self.file, buf, timeout)
    }
}

impl TxTransport for TtyTxTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        write_all(&mut self.file, bytes)
    }
}

impl Drop for TtyRxTransport {
    fn drop(&mut self) {
        trace!("[Auto-Drop] serial RX half of '{}' closed", self.path);
    }
}

impl SplittableTransport for TtyTransport {
    type Rx = TtyRxTransport;
    type Tx = TtyTxTransport;

    /// 分离为独立的 RX 和 TX 半部
    ///
    /// # 错误
    /// - `TransportError::Closed`: 已关闭
    /// - `TransportError::Io`: `dup()` 失败
    fn split(mut self) -> Result<(Self::Rx, Self::Tx), TransportError> {
        let file = self.file.take().ok_or(TransportError::Closed)?;
        let rx_file = file.try_clone().map_err(|e| {
            warn!("Failed to clone serial fd for RX: {}", e);
            TransportError::Io(e)
        })?;

        trace!("TtyTransport split into RX and TX halves ({})", self.path);
        Ok((
            TtyRxTransport {
                file: rx_file,
                path: std::mem::take(&mut self.path),
            },
            TtyTxTransport { file },
        ))
    }
}
