//! 协议变体编解码器
//!
//! 主机侧（`ProtocolCodec`）：编码 `Command`、解码设备输入。
//! 设备侧（`DeviceCodec`）：解码主机指令、编码输入事件，供模拟设备与往返测试使用。
//!
//! 变体在打开会话时由型号表选定一次，之后通过 `Codec` 枚举静态分发。

pub mod forty_h;
pub mod mext;
pub mod series;

pub use forty_h::FortyHCodec;
pub use mext::MextCodec;
pub use series::SeriesCodec;

use crate::command::{Bounds, Command};
use crate::event::{Event, Inbound, Query, SystemReply};
use crate::geometry::GridSize;
use crate::ProtocolError;
use bilge::prelude::*;
use smallvec::SmallVec;

/// 单条指令编码后的字节（最长的 mext 等级图为 35 字节）
pub type Encoded = SmallVec<[u8; 64]>;

/// 协议变体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProtocolVariant {
    /// monome 40h / arduinome
    FortyH,
    /// 64 / 128 / 256
    Series,
    /// 扩展协议（grid 与 arc）
    Mext,
}

impl ProtocolVariant {
    pub fn name(self) -> &'static str {
        match self {
            ProtocolVariant::FortyH => "40h",
            ProtocolVariant::Series => "series",
            ProtocolVariant::Mext => "mext",
        }
    }

    /// 变体支持的最大网格
    pub fn max_grid_size(self) -> GridSize {
        match self {
            ProtocolVariant::FortyH => GridSize::new(8, 8),
            ProtocolVariant::Series | ProtocolVariant::Mext => GridSize::new(16, 16),
        }
    }
}

impl std::fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ProtocolVariant {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "40h" => Ok(ProtocolVariant::FortyH),
            "series" => Ok(ProtocolVariant::Series),
            "mext" => Ok(ProtocolVariant::Mext),
            _ => Err(ProtocolError::InvalidValue {
                field: format!("protocol variant `{s}`"),
                value: 0,
            }),
        }
    }
}

/// 设备能力
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// 开/关 LED
    Led,
    /// 亮度等级（单色设备通过阈值降级模拟）
    LedLevel,
    /// arc 光环
    LedRing,
    Tilt,
}

impl Feature {
    pub fn name(self) -> &'static str {
        match self {
            Feature::Led => "led",
            Feature::LedLevel => "led level",
            Feature::LedRing => "led ring",
            Feature::Tilt => "tilt",
        }
    }
}

impl Bounds {
    /// 设备本身是否具备该能力（与协议变体无关）
    pub fn has(&self, feature: Feature) -> bool {
        match feature {
            Feature::Led | Feature::LedLevel => !self.grid.is_empty(),
            Feature::LedRing => self.rings > 0,
            Feature::Tilt => self.tilt_sensors > 0,
        }
    }
}

/// 整帧刷新策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStrategy {
    /// 每行一条位图消息（40h）
    Rows,
    /// 8x8 象限位图（series）
    Quadrants,
    /// 8x8 等级图（mext grid）
    LevelMaps,
    /// 每个光环一条等级图（mext arc）
    RingMaps,
}

/// `decode_bytes` 的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    pub messages: Vec<Inbound>,
    /// 已消费的字节数；不完整的帧留在缓冲区中
    pub consumed: usize,
}

impl Decoded {
    /// 只取输入事件
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.messages.iter().filter_map(|m| match m {
            Inbound::Event(ev) => Some(ev),
            _ => None,
        })
    }
}

/// 设备侧解码出的主机消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Command(Command),
    Query(Query),
    /// 未知操作码（跳过 1 字节）
    Unknown(u8),
}

/// `decode_command` 的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedCommands {
    pub messages: Vec<Outbound>,
    pub consumed: usize,
}

impl DecodedCommands {
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.messages.iter().filter_map(|m| match m {
            Outbound::Command(cmd) => Some(cmd),
            _ => None,
        })
    }
}

/// 主机侧编解码能力
pub trait ProtocolCodec {
    fn variant(&self) -> ProtocolVariant;

    /// 当前设备的校验边界
    fn bounds(&self) -> Bounds;

    fn max_grid_size(&self) -> GridSize {
        self.variant().max_grid_size()
    }

    /// 协议本身是否能表达该能力
    fn supports(&self, feature: Feature) -> bool;

    fn frame_strategy(&self) -> FrameStrategy;

    /// 编码单条指令
    ///
    /// 先做能力检查与边界校验，失败时不产生任何字节。
    fn encode_command(&self, cmd: &Command) -> Result<Encoded, ProtocolError>;

    /// 解码累积的输入字节（可续传）
    ///
    /// 缓冲区末尾的不完整帧不会被消费，调用方应保留它并在下次追加新数据后重试。
    fn decode_bytes(&mut self, buf: &[u8]) -> Decoded;

    /// 编码系统查询；只有 mext 支持
    fn encode_query(&self, query: Query) -> Result<Encoded, ProtocolError> {
        let _ = query;
        Err(ProtocolError::Unsupported {
            variant: self.variant().name(),
            what: "system query",
        })
    }

    /// 能力检查 + 边界校验
    fn check(&self, cmd: &Command) -> Result<(), ProtocolError> {
        let bounds = self.bounds();
        if let Some(feature) = cmd.feature()
            && !(self.supports(feature) && bounds.has(feature))
        {
            return Err(ProtocolError::Unsupported {
                variant: self.variant().name(),
                what: feature.name(),
            });
        }
        cmd.validate(&bounds)
    }
}

/// 设备侧编解码能力（模拟设备）
pub trait DeviceCodec {
    /// 解码主机发出的字节（可续传）
    fn decode_command(&self, buf: &[u8]) -> DecodedCommands;

    fn encode_event(&self, event: &Event) -> Result<Encoded, ProtocolError>;

    /// 编码系统应答；只有 mext 支持
    fn encode_reply(&self, reply: &SystemReply) -> Result<Encoded, ProtocolError>;
}

/// 单字节坐标：高 4 位 x，低 4 位 y
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, PartialEq)]
pub struct PackedCoord {
    pub y: u4,
    pub x: u4,
}

impl PackedCoord {
    /// 调用方需保证 `x`、`y` 小于 16
    pub fn pack(x: u8, y: u8) -> u8 {
        u8::from(PackedCoord::new(u4::new(y & 0x0F), u4::new(x & 0x0F))).value()
    }

    pub fn unpack(byte: u8) -> (u8, u8) {
        let coord = PackedCoord::from(u8::new(byte));
        (coord.x().value(), coord.y().value())
    }
}

/// 倾斜轴状态（40h 与 series 的模拟输入口：口 p 对应传感器 p/2 的 p%2 轴）
#[derive(Debug, Clone, Default)]
pub(crate) struct AuxTilt {
    axes: [[i16; 2]; 8],
}

impl AuxTilt {
    /// 更新一个口的采样并返回该传感器的完整事件
    pub(crate) fn update(&mut self, port: u8, value: u8) -> Event {
        let sensor = (port >> 1) & 0x07;
        let axis = (port & 1) as usize;
        let state = &mut self.axes[sensor as usize];
        state[axis] = value as i16;
        Event::Tilt {
            sensor,
            x: state[0],
            y: state[1],
            z: 0,
        }
    }
}

/// 把一个 tilt 事件拆成两个模拟口采样（x 口、y 口）
pub(crate) fn tilt_to_aux(event: &Event, variant: ProtocolVariant) -> Result<[(u8, u8); 2], ProtocolError> {
    let Event::Tilt { sensor, x, y, z } = *event else {
        return Err(ProtocolError::Unsupported {
            variant: variant.name(),
            what: "event",
        });
    };
    if sensor > 7 {
        return Err(ProtocolError::OutOfRange {
            field: "sensor",
            value: sensor as u16,
            limit: 8,
        });
    }
    let sample = |field: &'static str, v: i16| {
        u8::try_from(v).map_err(|_| ProtocolError::OutOfRange {
            field,
            value: v as u16,
            limit: 256,
        })
    };
    if z != 0 {
        return Err(ProtocolError::Unsupported {
            variant: variant.name(),
            what: "tilt z axis",
        });
    }
    Ok([(sensor * 2, sample("x", x)?), (sensor * 2 + 1, sample("y", y)?)])
}

/// 静态分发的编解码器
#[derive(Debug, Clone)]
pub enum Codec {
    FortyH(FortyHCodec),
    Series(SeriesCodec),
    Mext(MextCodec),
}

macro_rules! dispatch {
    ($self:ident, $codec:ident => $body:expr) => {
        match $self {
            Codec::FortyH($codec) => $body,
            Codec::Series($codec) => $body,
            Codec::Mext($codec) => $body,
        }
    };
}

impl Codec {
    /// 以变体的最大网格创建
    pub fn new(variant: ProtocolVariant) -> Self {
        let grid = Bounds::grid(variant.max_grid_size());
        Self::with_bounds(variant, grid)
    }

    pub fn with_bounds(variant: ProtocolVariant, bounds: Bounds) -> Self {
        match variant {
            ProtocolVariant::FortyH => Codec::FortyH(FortyHCodec::new()),
            ProtocolVariant::Series => Codec::Series(SeriesCodec::new(bounds.grid)),
            ProtocolVariant::Mext => Codec::Mext(MextCodec::new(bounds)),
        }
    }
}

impl ProtocolCodec for Codec {
    fn variant(&self) -> ProtocolVariant {
        dispatch!(self, c => c.variant())
    }

    fn bounds(&self) -> Bounds {
        dispatch!(self, c => c.bounds())
    }

    fn supports(&self, feature: Feature) -> bool {
        dispatch!(self, c => c.supports(feature))
    }

    fn frame_strategy(&self) -> FrameStrategy {
        dispatch!(self, c => c.frame_strategy())
    }

    fn encode_command(&self, cmd: &Command) -> Result<Encoded, ProtocolError> {
        dispatch!(self, c => c.encode_command(cmd))
    }

    fn decode_bytes(&mut self, buf: &[u8]) -> Decoded {
        dispatch!(self, c => c.decode_bytes(buf))
    }

    fn encode_query(&self, query: Query) -> Result<Encoded, ProtocolError> {
        dispatch!(self, c => c.encode_query(query))
    }
}

impl DeviceCodec for Codec {
    fn decode_command(&self, buf: &[u8]) -> DecodedCommands {
        dispatch!(self, c => c.decode_command(buf))
    }

    fn encode_event(&self, event: &Event) -> Result<Encoded, ProtocolError> {
        dispatch!(self, c => c.encode_event(event))
    }

    fn encode_reply(&self, reply: &SystemReply) -> Result<Encoded, ProtocolError> {
        dispatch!(self, c => c.encode_reply(reply))
    }
}

/// 行位图 -> 逐个 LedSet（用于协议无法直接表达的偏移）
pub(crate) fn emulate_row_as_sets(
    x_off: u8,
    y: u8,
    data: u8,
    mut emit: impl FnMut(u8, u8, bool),
) {
    for i in 0..8 {
        emit(x_off + i, y, data & (1 << i) != 0);
    }
}

pub(crate) fn emulate_col_as_sets(
    x: u8,
    y_off: u8,
    data: u8,
    mut emit: impl FnMut(u8, u8, bool),
) {
    for i in 0..8 {
        emit(x, y_off + i, data & (1 << i) != 0);
    }
}
