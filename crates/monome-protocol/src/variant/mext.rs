//! mext 扩展协议（2011 年之后的 grid 与 arc）
//!
//! 首字节 `subsystem << 4 | command`，载荷长度由操作码决定。
//! 坐标直接以字节给出，等级指令每字节打包两个等级（高 4 位在前）。
//!
//! | 子系统 | 编号 | 内容 |
//! |--------|------|------|
//! | system | 0 | 查询、ID、尺寸、版本 |
//! | led grid | 1 | 开关、位图、等级 |
//! | key grid | 2 | 按键 |
//! | encoder | 5 | 编码器增量与按键 |
//! | tilt | 8 | 倾斜 |
//! | led ring | 9 | 光环 |

use super::{
    Decoded, DecodedCommands, DeviceCodec, Encoded, Feature, FrameStrategy, Outbound,
    ProtocolCodec, ProtocolVariant,
};
use crate::ProtocolError;
use crate::command::{Bounds, Command};
use crate::event::{Event, Inbound, Query, SystemReply};
use crate::levels::{MAX_LEVEL, pack_levels, unpack_levels};
use smallvec::smallvec;

/// ID 字段长度
pub const ID_LEN: usize = 32;
/// 版本字段长度
pub const VERSION_LEN: usize = 8;

pub mod opcode {
    // system（主机 -> 设备）
    pub const QUERY: u8 = 0x00;
    pub const GET_ID: u8 = 0x01;
    pub const GET_GRID_SIZE: u8 = 0x05;

    // system（设备 -> 主机）
    pub const QUERY_RESPONSE: u8 = 0x00;
    pub const ID: u8 = 0x01;
    pub const GRID_OFFSET: u8 = 0x02;
    pub const GRID_SIZE: u8 = 0x03;
    pub const VERSION: u8 = 0x0F;

    // led grid
    pub const LED_OFF: u8 = 0x10;
    pub const LED_ON: u8 = 0x11;
    pub const LED_ALL_OFF: u8 = 0x12;
    pub const LED_ALL_ON: u8 = 0x13;
    pub const LED_MAP: u8 = 0x14;
    pub const LED_ROW: u8 = 0x15;
    pub const LED_COL: u8 = 0x16;
    pub const LED_INTENSITY: u8 = 0x17;
    pub const LED_LEVEL_SET: u8 = 0x18;
    pub const LED_LEVEL_ALL: u8 = 0x19;
    pub const LED_LEVEL_MAP: u8 = 0x1A;
    pub const LED_LEVEL_ROW: u8 = 0x1B;
    pub const LED_LEVEL_COL: u8 = 0x1C;

    // key grid
    pub const KEY_UP: u8 = 0x20;
    pub const KEY_DOWN: u8 = 0x21;

    // encoder
    pub const ENCODER_DELTA: u8 = 0x50;
    pub const ENCODER_KEY_UP: u8 = 0x51;
    pub const ENCODER_KEY_DOWN: u8 = 0x52;

    // tilt
    pub const TILT_ACTIVE: u8 = 0x80;
    pub const TILT: u8 = 0x81;
    pub const TILT_DISABLE: u8 = 0x82;
    pub const TILT_ENABLE: u8 = 0x83;

    // led ring
    pub const RING_SET: u8 = 0x90;
    pub const RING_ALL: u8 = 0x91;
    pub const RING_MAP: u8 = 0x92;
    pub const RING_RANGE: u8 = 0x93;
}

use opcode::*;

/// 设备 -> 主机的载荷长度（不含操作码）
fn inbound_payload_len(op: u8) -> Option<usize> {
    Some(match op {
        QUERY_RESPONSE => 2,
        ID => ID_LEN,
        GRID_OFFSET => 3,
        GRID_SIZE => 2,
        VERSION => VERSION_LEN,
        KEY_UP | KEY_DOWN => 2,
        ENCODER_DELTA => 2,
        ENCODER_KEY_UP | ENCODER_KEY_DOWN => 1,
        TILT_ACTIVE => 1,
        TILT => 7,
        _ => return None,
    })
}

/// 主机 -> 设备的载荷长度（不含操作码）
fn outbound_payload_len(op: u8) -> Option<usize> {
    Some(match op {
        QUERY | GET_ID | GET_GRID_SIZE => 0,
        LED_OFF | LED_ON => 2,
        LED_ALL_OFF | LED_ALL_ON => 0,
        LED_MAP => 10,
        LED_ROW | LED_COL => 3,
        LED_INTENSITY => 1,
        LED_LEVEL_SET => 3,
        LED_LEVEL_ALL => 1,
        LED_LEVEL_MAP => 2 + 32,
        LED_LEVEL_ROW | LED_LEVEL_COL => 2 + 4,
        TILT_DISABLE | TILT_ENABLE => 1,
        RING_SET => 3,
        RING_ALL => 2,
        RING_MAP => 1 + 32,
        RING_RANGE => 4,
        _ => return None,
    })
}

/// 去掉 NUL 填充后的字符串
fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// 写入定长、NUL 填充的字符串字段（过长时截断）
fn push_padded(out: &mut Encoded, s: &str, len: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(len);
    out.extend_from_slice(&bytes[..n]);
    out.extend(std::iter::repeat_n(0u8, len - n));
}

/// mext 编解码器
#[derive(Debug, Clone)]
pub struct MextCodec {
    bounds: Bounds,
}

impl Default for MextCodec {
    fn default() -> Self {
        Self::new(Bounds::grid(ProtocolVariant::Mext.max_grid_size()))
    }
}

impl MextCodec {
    pub fn new(bounds: Bounds) -> Self {
        Self { bounds }
    }

    /// 是否为 arc（只有光环、没有网格）
    pub fn is_arc(&self) -> bool {
        self.bounds.grid.is_empty() && self.bounds.rings > 0
    }

    fn decode_inbound(op: u8, payload: &[u8]) -> Inbound {
        match op {
            QUERY_RESPONSE => Inbound::Reply(SystemReply::Query {
                section: payload[0],
                count: payload[1],
            }),
            ID => Inbound::Reply(SystemReply::Id(trim_nul(payload))),
            GRID_OFFSET => Inbound::Reply(SystemReply::GridOffset {
                index: payload[0],
                x: payload[1],
                y: payload[2],
            }),
            GRID_SIZE => Inbound::Reply(SystemReply::GridSize {
                cols: payload[0],
                rows: payload[1],
            }),
            VERSION => Inbound::Reply(SystemReply::Version(trim_nul(payload))),
            KEY_UP => Inbound::Event(Event::ButtonUp {
                x: payload[0],
                y: payload[1],
            }),
            KEY_DOWN => Inbound::Event(Event::ButtonDown {
                x: payload[0],
                y: payload[1],
            }),
            ENCODER_DELTA => Inbound::Event(Event::EncoderDelta {
                ring: payload[0],
                delta: payload[1] as i8,
            }),
            ENCODER_KEY_UP => Inbound::Event(Event::EncoderKeyUp { ring: payload[0] }),
            ENCODER_KEY_DOWN => Inbound::Event(Event::EncoderKeyDown { ring: payload[0] }),
            TILT_ACTIVE => Inbound::Reply(SystemReply::TiltActive { sensor: payload[0] }),
            TILT => {
                let axis = |i: usize| i16::from_be_bytes([payload[i], payload[i + 1]]);
                Inbound::Event(Event::Tilt {
                    sensor: payload[0],
                    x: axis(1),
                    y: axis(3),
                    z: axis(5),
                })
            },
            other => Inbound::Ignored(other),
        }
    }

    fn decode_outbound(op: u8, p: &[u8]) -> Outbound {
        let unpack64 = |packed: &[u8]| {
            let mut levels = [0u8; 64];
            unpack_levels(packed, &mut levels);
            levels
        };
        let unpack8 = |packed: &[u8]| {
            let mut levels = [0u8; 8];
            unpack_levels(packed, &mut levels);
            levels
        };
        let cmd = match op {
            QUERY => return Outbound::Query(Query::System),
            GET_ID => return Outbound::Query(Query::Id),
            GET_GRID_SIZE => return Outbound::Query(Query::GridSize),
            LED_OFF | LED_ON => Command::LedSet {
                x: p[0],
                y: p[1],
                on: op == LED_ON,
            },
            LED_ALL_OFF | LED_ALL_ON => Command::LedAll { on: op == LED_ALL_ON },
            LED_MAP => {
                let mut rows = [0u8; 8];
                rows.copy_from_slice(&p[2..10]);
                Command::LedMap {
                    x_off: p[0],
                    y_off: p[1],
                    rows,
                }
            },
            LED_ROW => Command::LedRow {
                x_off: p[0],
                y: p[1],
                data: p[2],
            },
            LED_COL => Command::LedCol {
                x: p[0],
                y_off: p[1],
                data: p[2],
            },
            LED_INTENSITY => Command::Intensity { level: p[0] },
            LED_LEVEL_SET => Command::LevelSet {
                x: p[0],
                y: p[1],
                level: p[2],
            },
            LED_LEVEL_ALL => Command::LevelAll { level: p[0] },
            LED_LEVEL_MAP => Command::LevelMap {
                x_off: p[0],
                y_off: p[1],
                levels: unpack64(&p[2..]),
            },
            LED_LEVEL_ROW => Command::LevelRow {
                x_off: p[0],
                y: p[1],
                levels: unpack8(&p[2..]),
            },
            LED_LEVEL_COL => Command::LevelCol {
                x: p[0],
                y_off: p[1],
                levels: unpack8(&p[2..]),
            },
            TILT_DISABLE => Command::TiltDisable { sensor: p[0] },
            TILT_ENABLE => Command::TiltEnable { sensor: p[0] },
            RING_SET => Command::RingSet {
                ring: p[0],
                led: p[1],
                level: p[2],
            },
            RING_ALL => Command::RingAll {
                ring: p[0],
                level: p[1],
            },
            RING_MAP => Command::RingMap {
                ring: p[0],
                levels: unpack64(&p[1..]),
            },
            RING_RANGE => Command::RingRange {
                ring: p[0],
                start: p[1],
                end: p[2],
                level: p[3],
            },
            other => return Outbound::Unknown(other),
        };
        Outbound::Command(cmd)
    }
}

/// 按长度表切分帧，`decode` 处理每个完整帧
fn split_frames<T>(
    buf: &[u8],
    payload_len: impl Fn(u8) -> Option<usize>,
    unknown: impl Fn(u8) -> T,
    mut decode: impl FnMut(u8, &[u8]) -> T,
    out: &mut Vec<T>,
) -> usize {
    let mut pos = 0;
    while pos < buf.len() {
        let op = buf[pos];
        let Some(len) = payload_len(op) else {
            // 未知操作码无法确定长度，跳过 1 字节重新同步
            out.push(unknown(op));
            pos += 1;
            continue;
        };
        let Some(payload) = buf.get(pos + 1..pos + 1 + len) else {
            break;
        };
        out.push(decode(op, payload));
        pos += 1 + len;
    }
    pos
}

impl ProtocolCodec for MextCodec {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Mext
    }

    fn bounds(&self) -> Bounds {
        self.bounds
    }

    fn supports(&self, _feature: Feature) -> bool {
        true
    }

    fn frame_strategy(&self) -> FrameStrategy {
        if self.is_arc() {
            FrameStrategy::RingMaps
        } else {
            FrameStrategy::LevelMaps
        }
    }

    fn encode_command(&self, cmd: &Command) -> Result<Encoded, ProtocolError> {
        self.check(cmd)?;

        let mut out = Encoded::new();
        match *cmd {
            Command::LedSet { x, y, on } => {
                out.extend_from_slice(&[if on { LED_ON } else { LED_OFF }, x, y]);
            },
            Command::LedAll { on } => out.push(if on { LED_ALL_ON } else { LED_ALL_OFF }),
            Command::LedMap {
                x_off,
                y_off,
                ref rows,
            } => {
                out.extend_from_slice(&[LED_MAP, x_off, y_off]);
                out.extend_from_slice(rows);
            },
            Command::LedRow { x_off, y, data } => out.extend_from_slice(&[LED_ROW, x_off, y, data]),
            Command::LedCol { x, y_off, data } => out.extend_from_slice(&[LED_COL, x, y_off, data]),
            Command::Intensity { level } => out.extend_from_slice(&[LED_INTENSITY, level & MAX_LEVEL]),
            Command::LevelSet { x, y, level } => {
                out.extend_from_slice(&[LED_LEVEL_SET, x, y, level]);
            },
            Command::LevelAll { level } => out.extend_from_slice(&[LED_LEVEL_ALL, level]),
            Command::LevelMap {
                x_off,
                y_off,
                ref levels,
            } => {
                out.extend_from_slice(&[LED_LEVEL_MAP, x_off, y_off]);
                pack_levels(levels, &mut out);
            },
            Command::LevelRow { x_off, y, ref levels } => {
                out.extend_from_slice(&[LED_LEVEL_ROW, x_off, y]);
                pack_levels(levels, &mut out);
            },
            Command::LevelCol { x, y_off, ref levels } => {
                out.extend_from_slice(&[LED_LEVEL_COL, x, y_off]);
                pack_levels(levels, &mut out);
            },
            Command::RingSet { ring, led, level } => {
                out.extend_from_slice(&[RING_SET, ring, led, level]);
            },
            Command::RingAll { ring, level } => out.extend_from_slice(&[RING_ALL, ring, level]),
            Command::RingMap { ring, ref levels } => {
                out.extend_from_slice(&[RING_MAP, ring]);
                pack_levels(levels, &mut out);
            },
            Command::RingRange {
                ring,
                start,
                end,
                level,
            } => out.extend_from_slice(&[RING_RANGE, ring, start, end, level]),
            Command::TiltEnable { sensor } => out.extend_from_slice(&[TILT_ENABLE, sensor]),
            Command::TiltDisable { sensor } => out.extend_from_slice(&[TILT_DISABLE, sensor]),
            Command::SetRotation(_) => {},
        }
        Ok(out)
    }

    fn decode_bytes(&mut self, buf: &[u8]) -> Decoded {
        let mut messages = Vec::new();
        let consumed = split_frames(
            buf,
            inbound_payload_len,
            Inbound::Ignored,
            Self::decode_inbound,
            &mut messages,
        );
        Decoded { messages, consumed }
    }

    fn encode_query(&self, query: Query) -> Result<Encoded, ProtocolError> {
        let op = match query {
            Query::System => QUERY,
            Query::Id => GET_ID,
            Query::GridSize => GET_GRID_SIZE,
        };
        Ok(smallvec![op])
    }
}

impl DeviceCodec for MextCodec {
    fn decode_command(&self, buf: &[u8]) -> DecodedCommands {
        let mut messages = Vec::new();
        let consumed = split_frames(
            buf,
            outbound_payload_len,
            Outbound::Unknown,
            Self::decode_outbound,
            &mut messages,
        );
        DecodedCommands { messages, consumed }
    }

    fn encode_event(&self, event: &Event) -> Result<Encoded, ProtocolError> {
        let out: Encoded = match *event {
            Event::ButtonDown { x, y } => smallvec![KEY_DOWN, x, y],
            Event::ButtonUp { x, y } => smallvec![KEY_UP, x, y],
            Event::EncoderDelta { ring, delta } => smallvec![ENCODER_DELTA, ring, delta as u8],
            Event::EncoderKeyDown { ring } => smallvec![ENCODER_KEY_DOWN, ring],
            Event::EncoderKeyUp { ring } => smallvec![ENCODER_KEY_UP, ring],
            Event::Tilt { sensor, x, y, z } => {
                let mut out: Encoded = smallvec![TILT, sensor];
                for axis in [x, y, z] {
                    out.extend_from_slice(&axis.to_be_bytes());
                }
                out
            },
        };
        Ok(out)
    }

    fn encode_reply(&self, reply: &SystemReply) -> Result<Encoded, ProtocolError> {
        let mut out = Encoded::new();
        match reply {
            SystemReply::Query { section, count } => {
                out.extend_from_slice(&[QUERY_RESPONSE, *section, *count]);
            },
            SystemReply::Id(id) => {
                out.push(ID);
                push_padded(&mut out, id, ID_LEN);
            },
            SystemReply::GridOffset { index, x, y } => {
                out.extend_from_slice(&[GRID_OFFSET, *index, *x, *y]);
            },
            SystemReply::GridSize { cols, rows } => out.extend_from_slice(&[GRID_SIZE, *cols, *rows]),
            SystemReply::Version(version) => {
                out.push(VERSION);
                push_padded(&mut out, version, VERSION_LEN);
            },
            SystemReply::TiltActive { sensor } => out.extend_from_slice(&[TILT_ACTIVE, *sensor]),
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GridSize;

    fn grid() -> MextCodec {
        MextCodec::new(Bounds::grid(GridSize::new(16, 8)))
    }

    #[test]
    fn test_led_commands() {
        let codec = grid();
        let enc = |cmd: Command| codec.encode_command(&cmd).unwrap().to_vec();
        assert_eq!(enc(Command::LedSet { x: 12, y: 3, on: true }), vec![0x11, 12, 3]);
        assert_eq!(enc(Command::LedAll { on: false }), vec![0x12]);
        assert_eq!(enc(Command::LedRow { x_off: 8, y: 2, data: 0x0F }), vec![0x15, 8, 2, 0x0F]);
        assert_eq!(enc(Command::Intensity { level: 15 }), vec![0x17, 15]);
    }

    #[test]
    fn test_level_map_packing() {
        let mut levels = [0u8; 64];
        levels[0] = 15;
        levels[1] = 1;
        levels[63] = 9;
        let bytes = grid()
            .encode_command(&Command::LevelMap {
                x_off: 8,
                y_off: 0,
                levels,
            })
            .unwrap();
        assert_eq!(bytes.len(), 35);
        assert_eq!(&bytes[..4], &[0x1A, 8, 0, 0xF1]);
        assert_eq!(bytes[34], 0x09);
    }

    #[test]
    fn test_level_row_packing() {
        let bytes = grid()
            .encode_command(&Command::LevelRow {
                x_off: 0,
                y: 5,
                levels: [1, 2, 3, 4, 5, 6, 7, 8],
            })
            .unwrap();
        assert_eq!(bytes.to_vec(), vec![0x1B, 0, 5, 0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_ring_commands() {
        let arc = MextCodec::new(Bounds::arc(4));
        assert!(arc.is_arc());
        assert_eq!(
            arc.encode_command(&Command::RingRange {
                ring: 1,
                start: 60,
                end: 3,
                level: 10
            })
            .unwrap()
            .to_vec(),
            vec![0x93, 1, 60, 3, 10]
        );
        assert!(arc.encode_command(&Command::RingSet { ring: 4, led: 0, level: 1 }).is_err());
    }

    #[test]
    fn test_decode_system_replies() {
        let mut codec = grid();
        let mut bytes = vec![0x01];
        bytes.extend_from_slice(b"m1000123");
        bytes.resize(1 + ID_LEN, 0);
        bytes.extend_from_slice(&[0x03, 16, 8, 0x00, 1, 1]);

        let decoded = codec.decode_bytes(&bytes);
        assert_eq!(decoded.consumed, bytes.len());
        assert_eq!(
            decoded.messages,
            vec![
                Inbound::Reply(SystemReply::Id("m1000123".into())),
                Inbound::Reply(SystemReply::GridSize { cols: 16, rows: 8 }),
                Inbound::Reply(SystemReply::Query { section: 1, count: 1 }),
            ]
        );
    }

    #[test]
    fn test_decode_encoder_and_tilt() {
        let mut codec = MextCodec::new(Bounds::arc(4));
        let bytes = [0x50, 2, 0xFE, 0x52, 1, 0x81, 0, 0xFF, 0xFF, 0x01, 0x00, 0, 5];
        let events: Vec<_> = codec.decode_bytes(&bytes).events().copied().collect();
        assert_eq!(
            events,
            vec![
                Event::EncoderDelta { ring: 2, delta: -2 },
                Event::EncoderKeyDown { ring: 1 },
                Event::Tilt {
                    sensor: 0,
                    x: -1,
                    y: 256,
                    z: 5
                },
            ]
        );
    }

    #[test]
    fn test_unknown_opcode_skipped() {
        let mut codec = grid();
        let decoded = codec.decode_bytes(&[0x44, 0x21, 1, 2]);
        assert_eq!(decoded.consumed, 4);
        assert_eq!(
            decoded.messages,
            vec![Inbound::Ignored(0x44), Inbound::Event(Event::ButtonDown { x: 1, y: 2 })]
        );
    }

    #[test]
    fn test_queries() {
        let codec = grid();
        assert_eq!(codec.encode_query(Query::Id).unwrap().to_vec(), vec![0x01]);
        assert_eq!(codec.encode_query(Query::GridSize).unwrap().to_vec(), vec![0x05]);
        assert_eq!(
            codec.decode_command(&[0x00, 0x01, 0x05]).messages,
            vec![
                Outbound::Query(Query::System),
                Outbound::Query(Query::Id),
                Outbound::Query(Query::GridSize),
            ]
        );
    }

    #[test]
    fn test_reply_padding() {
        let codec = grid();
        let bytes = codec.encode_reply(&SystemReply::Id("m64-1".into())).unwrap();
        assert_eq!(bytes.len(), 1 + ID_LEN);
        assert_eq!(&bytes[1..6], b"m64-1");
        assert!(bytes[6..].iter().all(|&b| b == 0));
    }
}
