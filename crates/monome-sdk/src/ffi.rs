//! C 调用接口
//!
//! 会话以 64 位句柄暴露给 C，句柄表是进程级的（`parking_lot::Mutex`）。
//! 所有入口返回 [`MonomeStatus`]，结果通过输出参数传回。
//!
//! 回调在会话的事件循环线程中调用；回调内可以再次调用 `monome_draw` 等接口，
//! 但不能关闭同一个会话。

use monome_driver::{HandlerResult, Monome, MonomeBuilder, MonomeError};
use monome_protocol::{Command, Event, InboundEvent, Rotation};
use monome_serial::{DeviceDescriptor, Discovery};
use num_enum::TryFromPrimitive;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_void};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// 会话句柄（0 永远无效）
pub type MonomeHandle = u64;

/// 状态码
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonomeStatus {
    Ok = 0,
    NotFound = 1,
    PermissionDenied = 2,
    Busy = 3,
    Disconnected = 4,
    IoError = 5,
    ProtocolTimeout = 6,
    UnknownDevice = 7,
    ValidationError = 8,
    Unsupported = 9,
    SessionClosed = 10,
    /// 空指针、无效句柄或无效操作码
    InvalidArgument = 11,
}

impl From<&MonomeError> for MonomeStatus {
    fn from(e: &MonomeError) -> Self {
        match e {
            MonomeError::NotFound(_) => MonomeStatus::NotFound,
            MonomeError::PermissionDenied(_) => MonomeStatus::PermissionDenied,
            MonomeError::Busy(_) => MonomeStatus::Busy,
            MonomeError::Disconnected => MonomeStatus::Disconnected,
            MonomeError::Io(_) => MonomeStatus::IoError,
            MonomeError::ProtocolTimeout { .. } => MonomeStatus::ProtocolTimeout,
            MonomeError::UnknownDevice(_) => MonomeStatus::UnknownDevice,
            MonomeError::Validation(_) => MonomeStatus::ValidationError,
            MonomeError::Unsupported(_) => MonomeStatus::Unsupported,
            MonomeError::SessionClosed => MonomeStatus::SessionClosed,
        }
    }
}

impl<T> From<Result<T, MonomeError>> for MonomeStatus {
    fn from(result: Result<T, MonomeError>) -> Self {
        match result {
            Ok(_) => MonomeStatus::Ok,
            Err(e) => {
                debug!("FFI call failed: {}", e);
                MonomeStatus::from(&e)
            },
        }
    }
}

// ==================== 句柄表 ====================

static SESSIONS: LazyLock<Mutex<HashMap<MonomeHandle, Arc<Monome>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// 把 Rust 侧建立的会话登记到句柄表（宿主程序自行打开设备时使用）
pub fn register_session(session: Monome) -> MonomeHandle {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    SESSIONS.lock().insert(handle, Arc::new(session));
    handle
}

/// 取出会话引用后立即释放表锁，回调线程可以安全地重入
fn session(handle: MonomeHandle) -> Option<Arc<Monome>> {
    SESSIONS.lock().get(&handle).cloned()
}

fn with_session(
    handle: MonomeHandle,
    f: impl FnOnce(&Monome) -> Result<(), MonomeError>,
) -> MonomeStatus {
    match session(handle) {
        Some(session) => f(&session).into(),
        None => MonomeStatus::InvalidArgument,
    }
}

// ==================== 设备枚举 ====================

/// 枚举得到的设备描述（字符串由本库分配）
#[repr(C)]
#[derive(Debug)]
pub struct MonomeDeviceDescriptor {
    pub path: *mut c_char,
    /// 可能为空
    pub serial: *mut c_char,
    /// 0 表示未知
    pub vendor_id: u16,
    pub product_id: u16,
}

fn c_string(s: &str) -> *mut c_char {
    // 路径与序列号不会包含 NUL；包含时退化为空串
    CString::new(s).unwrap_or_default().into_raw()
}

impl From<&DeviceDescriptor> for MonomeDeviceDescriptor {
    fn from(d: &DeviceDescriptor) -> Self {
        Self {
            path: c_string(&d.path),
            serial: d.serial.as_deref().map_or(std::ptr::null_mut(), c_string),
            vendor_id: d.vendor_id.unwrap_or(0),
            product_id: d.product_id.unwrap_or(0),
        }
    }
}

/// 枚举已连接的设备
///
/// 成功时 `*out_list` 指向 `*out_len` 个描述，需用 [`monome_descriptor_list_free`] 释放。
/// 没有设备时返回 `Ok`，列表为空指针、长度为 0。
///
/// # Safety
/// `out_list` 与 `out_len` 必须是有效的可写指针。
#[unsafe(no_mangle)]
pub unsafe extern "C" fn monome_discover(
    out_list: *mut *mut MonomeDeviceDescriptor,
    out_len: *mut usize,
) -> MonomeStatus {
    if out_list.is_null() || out_len.is_null() {
        return MonomeStatus::InvalidArgument;
    }
    let found = match Discovery::new().scan() {
        Ok(found) => found,
        Err(e) => return MonomeStatus::from(&MonomeError::from(e)),
    };

    let list: Box<[MonomeDeviceDescriptor]> = found.iter().map(Into::into).collect();
    let len = list.len();
    let ptr = if len == 0 {
        std::ptr::null_mut()
    } else {
        Box::into_raw(list).cast::<MonomeDeviceDescriptor>()
    };
    unsafe {
        *out_list = ptr;
        *out_len = len;
    }
    MonomeStatus::Ok
}

/// 释放 [`monome_discover`] 返回的列表
///
/// # Safety
/// `list` / `len` 必须是 `monome_discover` 返回的原值，且只能释放一次。
#[unsafe(no_mangle)]
pub unsafe extern "C" fn monome_descriptor_list_free(list: *mut MonomeDeviceDescriptor, len: usize) {
    if list.is_null() {
        return;
    }
    let list = unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(list, len)) };
    for d in list.iter() {
        for s in [d.path, d.serial] {
            if !s.is_null() {
                drop(unsafe { CString::from_raw(s) });
            }
        }
    }
}

// ==================== 会话生命周期 ====================

/// 打开设备
///
/// `path` 为空指针时打开第一个枚举到的设备。
///
/// # Safety
/// `path` 为空或指向以 NUL 结尾的字符串；`out_handle` 必须是有效的可写指针。
#[unsafe(no_mangle)]
pub unsafe extern "C" fn monome_open(
    path: *const c_char,
    out_handle: *mut MonomeHandle,
) -> MonomeStatus {
    if out_handle.is_null() {
        return MonomeStatus::InvalidArgument;
    }
    let mut builder = MonomeBuilder::new();
    if !path.is_null() {
        match unsafe { CStr::from_ptr(path) }.to_str() {
            Ok(path) => builder = builder.device(path),
            Err(_) => return MonomeStatus::InvalidArgument,
        }
    }

    #[cfg(unix)]
    let opened = builder.build();
    #[cfg(not(unix))]
    let opened: Result<Monome, MonomeError> = {
        let _ = builder;
        Err(MonomeError::NotFound("serial devices are only supported on unix".into()))
    };

    match opened {
        Ok(session) => {
            let handle = register_session(session);
            unsafe { *out_handle = handle };
            MonomeStatus::Ok
        },
        Err(e) => MonomeStatus::from(&e),
    }
}

/// 关闭会话并使句柄失效
///
/// 其它线程仍在使用该会话时，关闭在最后一个调用返回后完成。
#[unsafe(no_mangle)]
pub extern "C" fn monome_close(handle: MonomeHandle) -> MonomeStatus {
    let Some(session) = SESSIONS.lock().remove(&handle) else {
        return MonomeStatus::InvalidArgument;
    };
    match Arc::try_unwrap(session) {
        Ok(mut session) => session.close().into(),
        Err(_) => {
            warn!("Session handle {} still in use, closing when released", handle);
            MonomeStatus::Ok
        },
    }
}

// ==================== 绘制 ====================

/// 指令操作码
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum MonomeOp {
    LedSet = 0,
    LedAll = 1,
    LedMap = 2,
    LedRow = 3,
    LedCol = 4,
    Intensity = 5,
    LevelSet = 6,
    LevelAll = 7,
    LevelMap = 8,
    LevelRow = 9,
    LevelCol = 10,
    RingSet = 11,
    RingAll = 12,
    RingMap = 13,
    RingRange = 14,
    TiltEnable = 15,
    TiltDisable = 16,
    SetRotation = 17,
}

/// C 侧的绘制指令
///
/// | op | x | y | value | extra | data |
/// |----|---|---|-------|-------|------|
/// | LedSet / LevelSet | x | y | on / level | | |
/// | LedAll / LevelAll / Intensity / SetRotation | | | on / level / rotation | | |
/// | LedRow / LedCol | x(_off) | y(_off) | 位图 | | |
/// | LedMap | x_off | y_off | | | 8 行位图 |
/// | LevelRow / LevelCol | x(_off) | y(_off) | | | 8 个等级 |
/// | LevelMap | x_off | y_off | | | 64 个等级 |
/// | RingSet | ring | led | level | | |
/// | RingAll | ring | | level | | |
/// | RingMap | ring | | | | 64 个等级 |
/// | RingRange | ring | start | level | end | |
/// | TiltEnable / TiltDisable | sensor | | | | |
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MonomeCommand {
    pub op: u32,
    pub x: u8,
    pub y: u8,
    pub value: u8,
    pub extra: u8,
    pub data: [u8; 64],
}

impl MonomeCommand {
    pub fn new(op: MonomeOp) -> Self {
        Self {
            op: op as u32,
            x: 0,
            y: 0,
            value: 0,
            extra: 0,
            data: [0; 64],
        }
    }

    fn first8(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out.copy_from_slice(&self.data[..8]);
        out
    }

    /// 转换为协议指令；操作码未知时返回 `None`
    pub fn to_command(&self) -> Option<Command> {
        let op = MonomeOp::try_from(self.op).ok()?;
        let (x, y, value) = (self.x, self.y, self.value);
        Some(match op {
            MonomeOp::LedSet => Command::LedSet { x, y, on: value != 0 },
            MonomeOp::LedAll => Command::LedAll { on: value != 0 },
            MonomeOp::LedMap => Command::LedMap {
                x_off: x,
                y_off: y,
                rows: self.first8(),
            },
            MonomeOp::LedRow => Command::LedRow { x_off: x, y, data: value },
            MonomeOp::LedCol => Command::LedCol { x, y_off: y, data: value },
            MonomeOp::Intensity => Command::Intensity { level: value },
            MonomeOp::LevelSet => Command::LevelSet { x, y, level: value },
            MonomeOp::LevelAll => Command::LevelAll { level: value },
            MonomeOp::LevelMap => Command::LevelMap {
                x_off: x,
                y_off: y,
                levels: self.data,
            },
            MonomeOp::LevelRow => Command::LevelRow {
                x_off: x,
                y,
                levels: self.first8(),
            },
            MonomeOp::LevelCol => Command::LevelCol {
                x,
                y_off: y,
                levels: self.first8(),
            },
            MonomeOp::RingSet => Command::RingSet {
                ring: x,
                led: y,
                level: value,
            },
            MonomeOp::RingAll => Command::RingAll { ring: x, level: value },
            MonomeOp::RingMap => Command::RingMap {
                ring: x,
                levels: self.data,
            },
            MonomeOp::RingRange => Command::RingRange {
                ring: x,
                start: y,
                end: self.extra,
                level: value,
            },
            MonomeOp::TiltEnable => Command::TiltEnable { sensor: x },
            MonomeOp::TiltDisable => Command::TiltDisable { sensor: x },
            MonomeOp::SetRotation => Command::SetRotation(Rotation::from_bits(value)),
        })
    }
}

/// 绘制一条指令（逻辑坐标）
///
/// # Safety
/// `cmd` 必须指向有效的 `MonomeCommand`。
#[unsafe(no_mangle)]
pub unsafe extern "C" fn monome_draw(handle: MonomeHandle, cmd: *const MonomeCommand) -> MonomeStatus {
    if cmd.is_null() {
        return MonomeStatus::InvalidArgument;
    }
    let Some(command) = unsafe { &*cmd }.to_command() else {
        return MonomeStatus::InvalidArgument;
    };
    with_session(handle, |s| s.draw(&command))
}

/// 写出整个帧缓冲区
#[unsafe(no_mangle)]
pub extern "C" fn monome_refresh(handle: MonomeHandle) -> MonomeStatus {
    with_session(handle, Monome::refresh)
}

// ==================== 元数据 ====================

/// 逻辑行数（考虑旋转）
///
/// # Safety
/// `out_rows` 必须是有效的可写指针。
#[unsafe(no_mangle)]
pub unsafe extern "C" fn monome_get_rows(handle: MonomeHandle, out_rows: *mut u32) -> MonomeStatus {
    if out_rows.is_null() {
        return MonomeStatus::InvalidArgument;
    }
    with_session(handle, |s| {
        unsafe { *out_rows = s.rows() as u32 };
        Ok(())
    })
}

/// 逻辑列数（考虑旋转）
///
/// # Safety
/// `out_cols` 必须是有效的可写指针。
#[unsafe(no_mangle)]
pub unsafe extern "C" fn monome_get_cols(handle: MonomeHandle, out_cols: *mut u32) -> MonomeStatus {
    if out_cols.is_null() {
        return MonomeStatus::InvalidArgument;
    }
    with_session(handle, |s| {
        unsafe { *out_cols = s.cols() as u32 };
        Ok(())
    })
}

// ==================== 事件 ====================

/// 事件种类
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonomeEventKind {
    ButtonUp = 0,
    ButtonDown = 1,
    EncoderDelta = 2,
    EncoderKeyUp = 3,
    EncoderKeyDown = 4,
    Tilt = 5,
}

/// C 侧事件
///
/// - 按键：`x` / `y` 为逻辑坐标
/// - 编码器：`x` 为光环编号，`delta` 为增量
/// - 倾斜：`x` 为传感器编号，`tilt` 为三轴采样
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonomeEvent {
    pub kind: MonomeEventKind,
    pub x: u8,
    pub y: u8,
    pub delta: i8,
    pub tilt: [i16; 3],
    /// 自会话打开起的微秒数
    pub timestamp_us: u64,
}

impl From<&InboundEvent> for MonomeEvent {
    fn from(ev: &InboundEvent) -> Self {
        let mut out = MonomeEvent {
            kind: MonomeEventKind::ButtonUp,
            x: 0,
            y: 0,
            delta: 0,
            tilt: [0; 3],
            timestamp_us: ev.timestamp_us,
        };
        match ev.event {
            Event::ButtonDown { x, y } => {
                out.kind = MonomeEventKind::ButtonDown;
                (out.x, out.y) = (x, y);
            },
            Event::ButtonUp { x, y } => (out.x, out.y) = (x, y),
            Event::EncoderDelta { ring, delta } => {
                out.kind = MonomeEventKind::EncoderDelta;
                out.x = ring;
                out.delta = delta;
            },
            Event::EncoderKeyDown { ring } => {
                out.kind = MonomeEventKind::EncoderKeyDown;
                out.x = ring;
            },
            Event::EncoderKeyUp { ring } => {
                out.kind = MonomeEventKind::EncoderKeyUp;
                out.x = ring;
            },
            Event::Tilt { sensor, x, y, z } => {
                out.kind = MonomeEventKind::Tilt;
                out.x = sensor;
                out.tilt = [x, y, z];
            },
        }
        out
    }
}

/// 事件回调
pub type MonomeEventCallback = extern "C" fn(event: *const MonomeEvent, user_data: *mut c_void);

/// C 调用方的上下文指针，由调用方保证跨线程可用
struct UserData(*mut c_void);

unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

/// 注册（或以空回调清除）事件回调，接收全部类别的事件
///
/// 回调在事件循环线程中调用；`user_data` 原样传回。
#[unsafe(no_mangle)]
pub extern "C" fn monome_set_event_handler(
    handle: MonomeHandle,
    callback: Option<MonomeEventCallback>,
    user_data: *mut c_void,
) -> MonomeStatus {
    let user_data = UserData(user_data);
    with_session(handle, move |s| {
        match callback {
            Some(callback) => {
                s.set_catch_all_handler(move |ev: &InboundEvent| -> HandlerResult {
                    let event = MonomeEvent::from(ev);
                    callback(&event, user_data.get());
                    Ok(())
                })
            },
            None => s.clear_catch_all_handler(),
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use monome_protocol::EventType;

    #[test]
    fn test_status_mapping() {
        assert_eq!(MonomeStatus::from(Ok::<(), MonomeError>(())), MonomeStatus::Ok);
        assert_eq!(
            MonomeStatus::from(&MonomeError::ProtocolTimeout { timeout_ms: 500 }),
            MonomeStatus::ProtocolTimeout
        );
        assert_eq!(MonomeStatus::from(&MonomeError::SessionClosed), MonomeStatus::SessionClosed);
    }

    #[test]
    fn test_command_conversion() {
        let mut cmd = MonomeCommand::new(MonomeOp::LedRow);
        cmd.y = 3;
        cmd.value = 0xF0;
        assert_eq!(cmd.to_command(), Some(Command::LedRow { x_off: 0, y: 3, data: 0xF0 }));

        let mut range = MonomeCommand::new(MonomeOp::RingRange);
        (range.x, range.y, range.extra, range.value) = (1, 60, 4, 9);
        assert_eq!(
            range.to_command(),
            Some(Command::RingRange { ring: 1, start: 60, end: 4, level: 9 })
        );

        let mut rot = MonomeCommand::new(MonomeOp::SetRotation);
        rot.value = 6;
        assert_eq!(rot.to_command(), Some(Command::SetRotation(Rotation::R180)));

        let bogus = MonomeCommand { op: 99, ..MonomeCommand::new(MonomeOp::LedAll) };
        assert_eq!(bogus.to_command(), None);
    }

    #[test]
    fn test_event_conversion() {
        let ev = InboundEvent {
            event: Event::EncoderDelta { ring: 2, delta: -3 },
            timestamp_us: 42,
        };
        let out = MonomeEvent::from(&ev);
        assert_eq!(out.kind, MonomeEventKind::EncoderDelta);
        assert_eq!((out.x, out.delta, out.timestamp_us), (2, -3, 42));
        assert_eq!(ev.event.event_type(), EventType::Encoder);
    }

    #[test]
    fn test_invalid_arguments() {
        assert_eq!(monome_close(0), MonomeStatus::InvalidArgument);
        assert_eq!(monome_refresh(u64::MAX), MonomeStatus::InvalidArgument);
        assert_eq!(
            unsafe { monome_draw(1, std::ptr::null()) },
            MonomeStatus::InvalidArgument
        );
        assert_eq!(
            unsafe { monome_open(std::ptr::null(), std::ptr::null_mut()) },
            MonomeStatus::InvalidArgument
        );
    }
}
