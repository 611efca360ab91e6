//! series 协议（monome 64 / 128 / 256）
//!
//! 首字节高 4 位为操作码，低 4 位为参数；消息长度由操作码决定。
//! 输入只有按键（2 字节）与模拟口采样（2 字节）两种。

use super::{
    AuxTilt, Decoded, DecodedCommands, DeviceCodec, Encoded, Feature, FrameStrategy, Outbound,
    PackedCoord, ProtocolCodec, ProtocolVariant, emulate_col_as_sets, emulate_row_as_sets,
    tilt_to_aux,
};
use crate::ProtocolError;
use crate::command::{Bounds, Command, MAP_SIZE};
use crate::event::{Event, Inbound, SystemReply};
use crate::geometry::GridSize;
use crate::levels::{MAX_LEVEL, reduce_level_to_bit, reduce_levels_to_bitmask};
use smallvec::smallvec;

// 输入
const IN_KEY_DOWN: u8 = 0x0;
const IN_KEY_UP: u8 = 0x1;
const IN_AUX: u8 = 0xE;

// 输出
const OUT_LED_ON: u8 = 0x2;
const OUT_LED_OFF: u8 = 0x3;
const OUT_ROW8: u8 = 0x4;
const OUT_COL8: u8 = 0x5;
const OUT_ROW16: u8 = 0x6;
const OUT_COL16: u8 = 0x7;
const OUT_FRAME: u8 = 0x8;
const OUT_CLEAR: u8 = 0x9;
const OUT_INTENSITY: u8 = 0xA;
const OUT_AUX_ACTIVATE: u8 = 0xC;
const OUT_AUX_DEACTIVATE: u8 = 0xD;

#[inline]
fn header(opcode: u8, arg: u8) -> u8 {
    (opcode << 4) | (arg & 0x0F)
}

/// 输出消息长度（含首字节）
fn outbound_len(opcode: u8) -> usize {
    match opcode {
        OUT_LED_ON | OUT_LED_OFF | OUT_ROW8 | OUT_COL8 => 2,
        OUT_ROW16 | OUT_COL16 => 3,
        OUT_FRAME => 9,
        _ => 1,
    }
}

/// 象限编号：0=(0,0) 1=(8,0) 2=(0,8) 3=(8,8)
#[inline]
pub fn quadrant(x_off: u8, y_off: u8) -> u8 {
    x_off / MAP_SIZE + 2 * (y_off / MAP_SIZE)
}

/// series 编解码器
#[derive(Debug, Clone)]
pub struct SeriesCodec {
    grid: GridSize,
    tilt: AuxTilt,
}

impl Default for SeriesCodec {
    fn default() -> Self {
        Self::new(ProtocolVariant::Series.max_grid_size())
    }
}

impl SeriesCodec {
    pub fn new(grid: GridSize) -> Self {
        Self {
            grid,
            tilt: AuxTilt::default(),
        }
    }

    fn led(out: &mut Encoded, x: u8, y: u8, on: bool) {
        let opcode = if on { OUT_LED_ON } else { OUT_LED_OFF };
        out.extend_from_slice(&[header(opcode, 0), PackedCoord::pack(x, y)]);
    }

    fn row(out: &mut Encoded, x_off: u8, y: u8, data: u8) {
        if x_off == 0 {
            out.extend_from_slice(&[header(OUT_ROW8, y), data]);
        } else {
            // 协议只能寻址前 8 列，其余用单点模拟
            emulate_row_as_sets(x_off, y, data, |x, y, on| Self::led(out, x, y, on));
        }
    }

    fn col(out: &mut Encoded, x: u8, y_off: u8, data: u8) {
        if y_off == 0 {
            out.extend_from_slice(&[header(OUT_COL8, x), data]);
        } else {
            emulate_col_as_sets(x, y_off, data, |x, y, on| Self::led(out, x, y, on));
        }
    }

    fn frame(out: &mut Encoded, x_off: u8, y_off: u8, rows: &[u8; 8]) {
        out.push(header(OUT_FRAME, quadrant(x_off, y_off)));
        out.extend_from_slice(rows);
    }

    fn aux(out: &mut Encoded, sensor: u8, activate: bool) {
        let opcode = if activate {
            OUT_AUX_ACTIVATE
        } else {
            OUT_AUX_DEACTIVATE
        };
        out.extend_from_slice(&[header(opcode, sensor * 2), header(opcode, sensor * 2 + 1)]);
    }
}

impl ProtocolCodec for SeriesCodec {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Series
    }

    fn bounds(&self) -> Bounds {
        Bounds::grid(self.grid)
    }

    fn supports(&self, feature: Feature) -> bool {
        !matches!(feature, Feature::LedRing)
    }

    fn frame_strategy(&self) -> FrameStrategy {
        FrameStrategy::Quadrants
    }

    fn encode_command(&self, cmd: &Command) -> Result<Encoded, ProtocolError> {
        self.check(cmd)?;

        let mut out = Encoded::new();
        match *cmd {
            Command::LedSet { x, y, on } => Self::led(&mut out, x, y, on),
            Command::LevelSet { x, y, level } => {
                Self::led(&mut out, x, y, reduce_level_to_bit(level));
            },
            Command::LedAll { on } => out.push(header(OUT_CLEAR, on as u8)),
            Command::LevelAll { level } => {
                out.push(header(OUT_CLEAR, reduce_level_to_bit(level) as u8));
            },
            Command::LedMap { x_off, y_off, ref rows } => Self::frame(&mut out, x_off, y_off, rows),
            Command::LevelMap {
                x_off,
                y_off,
                ref levels,
            } => {
                let mut rows = [0u8; 8];
                for (row, cells) in rows.iter_mut().zip(levels.chunks_exact(8)) {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(cells);
                    *row = reduce_levels_to_bitmask(&buf);
                }
                Self::frame(&mut out, x_off, y_off, &rows);
            },
            Command::LedRow { x_off, y, data } => Self::row(&mut out, x_off, y, data),
            Command::LevelRow { x_off, y, ref levels } => {
                Self::row(&mut out, x_off, y, reduce_levels_to_bitmask(levels));
            },
            Command::LedCol { x, y_off, data } => Self::col(&mut out, x, y_off, data),
            Command::LevelCol { x, y_off, ref levels } => {
                Self::col(&mut out, x, y_off, reduce_levels_to_bitmask(levels));
            },
            Command::Intensity { level } => out.push(header(OUT_INTENSITY, level & MAX_LEVEL)),
            Command::TiltEnable { sensor } => Self::aux(&mut out, sensor, true),
            Command::TiltDisable { sensor } => Self::aux(&mut out, sensor, false),
            Command::SetRotation(_) => {},
            Command::RingSet { .. }
            | Command::RingAll { .. }
            | Command::RingMap { .. }
            | Command::RingRange { .. } => {
                return Err(ProtocolError::Unsupported {
                    variant: "series",
                    what: cmd.name(),
                });
            },
        }
        Ok(out)
    }

    fn decode_bytes(&mut self, buf: &[u8]) -> Decoded {
        let mut decoded = Decoded::default();
        let mut pos = 0;
        while pos < buf.len() {
            let (opcode, arg) = (buf[pos] >> 4, buf[pos] & 0x0F);
            let len = match opcode {
                IN_KEY_DOWN | IN_KEY_UP | IN_AUX => 2,
                _ => 1,
            };
            let Some(msg) = buf.get(pos..pos + len) else {
                break;
            };
            let inbound = match opcode {
                IN_KEY_DOWN | IN_KEY_UP => {
                    let (x, y) = PackedCoord::unpack(msg[1]);
                    Inbound::Event(if opcode == IN_KEY_DOWN {
                        Event::ButtonDown { x, y }
                    } else {
                        Event::ButtonUp { x, y }
                    })
                },
                IN_AUX => Inbound::Event(self.tilt.update(arg, msg[1])),
                _ => Inbound::Ignored(msg[0]),
            };
            decoded.messages.push(inbound);
            pos += len;
        }
        decoded.consumed = pos;
        decoded
    }
}

impl DeviceCodec for SeriesCodec {
    fn decode_command(&self, buf: &[u8]) -> DecodedCommands {
        let mut decoded = DecodedCommands::default();
        let mut pos = 0;
        while pos < buf.len() {
            let (opcode, arg) = (buf[pos] >> 4, buf[pos] & 0x0F);
            let len = outbound_len(opcode);
            let Some(msg) = buf.get(pos..pos + len) else {
                break;
            };
            let cmd = |c: Command| Outbound::Command(c);
            match opcode {
                OUT_LED_ON | OUT_LED_OFF => {
                    let (x, y) = PackedCoord::unpack(msg[1]);
                    decoded.messages.push(cmd(Command::LedSet {
                        x,
                        y,
                        on: opcode == OUT_LED_ON,
                    }));
                },
                OUT_ROW8 => decoded.messages.push(cmd(Command::LedRow {
                    x_off: 0,
                    y: arg,
                    data: msg[1],
                })),
                OUT_COL8 => decoded.messages.push(cmd(Command::LedCol {
                    x: arg,
                    y_off: 0,
                    data: msg[1],
                })),
                OUT_ROW16 => {
                    for (i, &data) in msg[1..].iter().enumerate() {
                        decoded.messages.push(cmd(Command::LedRow {
                            x_off: i as u8 * MAP_SIZE,
                            y: arg,
                            data,
                        }));
                    }
                },
                OUT_COL16 => {
                    for (i, &data) in msg[1..].iter().enumerate() {
                        decoded.messages.push(cmd(Command::LedCol {
                            x: arg,
                            y_off: i as u8 * MAP_SIZE,
                            data,
                        }));
                    }
                },
                OUT_FRAME => {
                    let mut rows = [0u8; 8];
                    rows.copy_from_slice(&msg[1..]);
                    decoded.messages.push(cmd(Command::LedMap {
                        x_off: (arg & 1) * MAP_SIZE,
                        y_off: ((arg >> 1) & 1) * MAP_SIZE,
                        rows,
                    }));
                },
                OUT_CLEAR => decoded.messages.push(cmd(Command::LedAll { on: arg & 1 == 1 })),
                OUT_INTENSITY => decoded.messages.push(cmd(Command::Intensity { level: arg })),
                OUT_AUX_ACTIVATE | OUT_AUX_DEACTIVATE => {
                    if arg % 2 == 0 {
                        let sensor = arg / 2;
                        decoded.messages.push(cmd(if opcode == OUT_AUX_ACTIVATE {
                            Command::TiltEnable { sensor }
                        } else {
                            Command::TiltDisable { sensor }
                        }));
                    }
                },
                _ => decoded.messages.push(Outbound::Unknown(msg[0])),
            }
            pos += len;
        }
        decoded.consumed = pos;
        decoded
    }

    fn encode_event(&self, event: &Event) -> Result<Encoded, ProtocolError> {
        match *event {
            Event::ButtonDown { x, y } => Ok(smallvec![header(IN_KEY_DOWN, 0), PackedCoord::pack(x, y)]),
            Event::ButtonUp { x, y } => Ok(smallvec![header(IN_KEY_UP, 0), PackedCoord::pack(x, y)]),
            Event::Tilt { .. } => {
                let mut out = Encoded::new();
                for (port, value) in tilt_to_aux(event, ProtocolVariant::Series)? {
                    out.extend_from_slice(&[header(IN_AUX, port), value]);
                }
                Ok(out)
            },
            _ => Err(ProtocolError::Unsupported {
                variant: "series",
                what: "encoder",
            }),
        }
    }

    fn encode_reply(&self, _reply: &SystemReply) -> Result<Encoded, ProtocolError> {
        Err(ProtocolError::Unsupported {
            variant: "series",
            what: "system reply",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec_128() -> SeriesCodec {
        SeriesCodec::new(GridSize::new(16, 8))
    }

    fn encode(cmd: Command) -> Vec<u8> {
        codec_128().encode_command(&cmd).unwrap().to_vec()
    }

    #[test]
    fn test_led_on_off() {
        assert_eq!(encode(Command::LedSet { x: 15, y: 7, on: true }), vec![0x20, 0xF7]);
        assert_eq!(encode(Command::LedSet { x: 0, y: 1, on: false }), vec![0x30, 0x01]);
    }

    #[test]
    fn test_clear_and_intensity() {
        assert_eq!(encode(Command::LedAll { on: false }), vec![0x90]);
        assert_eq!(encode(Command::LedAll { on: true }), vec![0x91]);
        assert_eq!(encode(Command::Intensity { level: 12 }), vec![0xAC]);
    }

    #[test]
    fn test_quadrant_frame() {
        let rows = [1, 2, 3, 4, 5, 6, 7, 8];
        let bytes = encode(Command::LedMap {
            x_off: 8,
            y_off: 0,
            rows,
        });
        assert_eq!(bytes, vec![0x81, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(quadrant(0, 8), 2);
        assert_eq!(quadrant(8, 8), 3);
    }

    #[test]
    fn test_row_offset_emulated() {
        assert_eq!(encode(Command::LedRow { x_off: 0, y: 3, data: 0x0F }), vec![0x43, 0x0F]);

        let bytes = encode(Command::LedRow { x_off: 8, y: 3, data: 0x01 });
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..2], &[0x20, 0x83]);
        assert_eq!(&bytes[2..4], &[0x30, 0x93]);
    }

    #[test]
    fn test_rejects_outside_128() {
        let codec = codec_128();
        assert!(codec.encode_command(&Command::LedSet { x: 0, y: 8, on: true }).is_err());
        assert!(
            codec
                .encode_command(&Command::LedMap {
                    x_off: 0,
                    y_off: 8,
                    rows: [0; 8]
                })
                .is_err()
        );
    }

    #[test]
    fn test_tilt_enable() {
        assert_eq!(encode(Command::TiltEnable { sensor: 0 }), vec![0xC0, 0xC1]);
        assert_eq!(encode(Command::TiltDisable { sensor: 0 }), vec![0xD0, 0xD1]);
    }

    #[test]
    fn test_decode_keys_and_aux() {
        let mut codec = codec_128();
        let decoded = codec.decode_bytes(&[0x00, 0x21, 0x10, 0x21, 0xE0, 0x7F, 0xE1]);
        assert_eq!(decoded.consumed, 6);
        let events: Vec<_> = decoded.events().copied().collect();
        assert_eq!(
            events,
            vec![
                Event::ButtonDown { x: 2, y: 1 },
                Event::ButtonUp { x: 2, y: 1 },
                Event::Tilt {
                    sensor: 0,
                    x: 0x7F,
                    y: 0,
                    z: 0
                },
            ]
        );

        // 续传：补齐 y 轴
        let decoded = codec.decode_bytes(&[0xE1, 0x10]);
        assert_eq!(
            decoded.events().next(),
            Some(&Event::Tilt {
                sensor: 0,
                x: 0x7F,
                y: 0x10,
                z: 0
            })
        );
    }

    #[test]
    fn test_device_side_frame_and_row16() {
        let codec = codec_128();
        let decoded = codec.decode_command(&[0x82, 1, 2, 3, 4, 5, 6, 7, 8, 0x61, 0xAA, 0x55]);
        assert_eq!(decoded.consumed, 12);
        assert_eq!(
            decoded.commands().cloned().collect::<Vec<_>>(),
            vec![
                Command::LedMap {
                    x_off: 0,
                    y_off: 8,
                    rows: [1, 2, 3, 4, 5, 6, 7, 8]
                },
                Command::LedRow {
                    x_off: 0,
                    y: 1,
                    data: 0xAA
                },
                Command::LedRow {
                    x_off: 8,
                    y: 1,
                    data: 0x55
                },
            ]
        );
    }

    #[test]
    fn test_partial_frame_not_consumed() {
        let codec = codec_128();
        let decoded = codec.decode_command(&[0x90, 0x80, 1, 2]);
        assert_eq!(decoded.consumed, 1);
        assert_eq!(decoded.messages, vec![Outbound::Command(Command::LedAll { on: false })]);
    }
}
