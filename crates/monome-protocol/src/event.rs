//! 输入事件与系统应答（设备 -> 主机）

/// 输入事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Event {
    ButtonDown { x: u8, y: u8 },
    ButtonUp { x: u8, y: u8 },
    /// 编码器旋转（正值顺时针）
    EncoderDelta { ring: u8, delta: i8 },
    EncoderKeyDown { ring: u8 },
    EncoderKeyUp { ring: u8 },
    /// 倾斜采样；旧协议只有 x/y 两轴，`z` 为 0
    Tilt { sensor: u8, x: i16, y: i16, z: i16 },
}

/// 事件类别（用于按类别注册回调）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum EventType {
    Button = 0,
    Encoder = 1,
    EncoderKey = 2,
    Tilt = 3,
}

impl EventType {
    /// 类别数量
    pub const COUNT: usize = 4;

    pub const ALL: [EventType; Self::COUNT] = [
        EventType::Button,
        EventType::Encoder,
        EventType::EncoderKey,
        EventType::Tilt,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::ButtonDown { .. } | Event::ButtonUp { .. } => EventType::Button,
            Event::EncoderDelta { .. } => EventType::Encoder,
            Event::EncoderKeyDown { .. } | Event::EncoderKeyUp { .. } => EventType::EncoderKey,
            Event::Tilt { .. } => EventType::Tilt,
        }
    }

    /// 按键坐标（仅按键事件）
    pub fn grid_position(&self) -> Option<(u8, u8)> {
        match *self {
            Event::ButtonDown { x, y } | Event::ButtonUp { x, y } => Some((x, y)),
            _ => None,
        }
    }

    /// 以新坐标替换按键事件的坐标，其它事件原样返回
    pub fn with_grid_position(self, x: u8, y: u8) -> Self {
        match self {
            Event::ButtonDown { .. } => Event::ButtonDown { x, y },
            Event::ButtonUp { .. } => Event::ButtonUp { x, y },
            other => other,
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::ButtonDown { x, y } => write!(f, "key down ({x}, {y})"),
            Event::ButtonUp { x, y } => write!(f, "key up ({x}, {y})"),
            Event::EncoderDelta { ring, delta } => write!(f, "enc {ring} delta {delta:+}"),
            Event::EncoderKeyDown { ring } => write!(f, "enc {ring} key down"),
            Event::EncoderKeyUp { ring } => write!(f, "enc {ring} key up"),
            Event::Tilt { sensor, x, y, z } => write!(f, "tilt {sensor} ({x}, {y}, {z})"),
        }
    }
}

/// 带时间戳的输入事件
///
/// `timestamp_us`：自会话打开起的单调微秒数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InboundEvent {
    pub event: Event,
    pub timestamp_us: u64,
}

/// mext 能力段编号（查询应答 `0x00` 的 section 字段）
pub mod section {
    pub const LED_GRID: u8 = 1;
    pub const KEY_GRID: u8 = 2;
    pub const DIGITAL_OUT: u8 = 3;
    pub const DIGITAL_IN: u8 = 4;
    pub const ENCODER: u8 = 5;
    pub const ANALOG_IN: u8 = 6;
    pub const ANALOG_OUT: u8 = 7;
    pub const TILT: u8 = 8;
    pub const LED_RING: u8 = 9;
}

/// 系统应答（识别阶段使用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemReply {
    /// 能力段及其数量
    Query { section: u8, count: u8 },
    /// 设备 ID（去掉 NUL 填充）
    Id(String),
    GridOffset { index: u8, x: u8, y: u8 },
    GridSize { cols: u8, rows: u8 },
    /// 固件版本（去掉 NUL 填充）
    Version(String),
    TiltActive { sensor: u8 },
}

/// 系统查询（主机 -> 设备，仅 mext）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// 能力查询（`0x00`）
    System,
    /// 设备 ID（`0x01`）
    Id,
    /// 网格尺寸（`0x05`）
    GridSize,
}

/// 解码结果中的单条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Event(Event),
    Reply(SystemReply),
    /// 已知长度但不关心的消息（记录操作码）
    Ignored(u8),
}
