//! 40h 协议（monome 40h、arduinome）
//!
//! 每条消息固定 2 字节：`[操作码 << 4 | 参数, 数据]`。
//! 设备只有 8x8 单色 LED，等级指令按阈值降级，全亮/位图通过 8 条行消息模拟。

use super::{
    AuxTilt, Decoded, DecodedCommands, DeviceCodec, Encoded, Feature, FrameStrategy, Outbound,
    PackedCoord, ProtocolCodec, ProtocolVariant, tilt_to_aux,
};
use crate::ProtocolError;
use crate::command::{Bounds, Command};
use crate::event::{Event, Inbound, SystemReply};
use crate::geometry::GridSize;
use crate::levels::{MAX_LEVEL, reduce_level_to_bit, reduce_levels_to_bitmask};
use smallvec::smallvec;

const MSG_LEN: usize = 2;

// 输入
const IN_KEY: u8 = 0x0;
const IN_ADC: u8 = 0x1;

// 输出
const OUT_LED: u8 = 0x2;
const OUT_INTENSITY: u8 = 0x3;
const OUT_ADC_ENABLE: u8 = 0x5;
const OUT_ROW: u8 = 0x7;
const OUT_COL: u8 = 0x8;

#[inline]
fn header(opcode: u8, arg: u8) -> u8 {
    (opcode << 4) | (arg & 0x0F)
}

/// 40h 编解码器
#[derive(Debug, Clone, Default)]
pub struct FortyHCodec {
    tilt: AuxTilt,
}

impl FortyHCodec {
    pub const GRID: GridSize = GridSize::new(8, 8);

    pub fn new() -> Self {
        Self::default()
    }

    fn rows(out: &mut Encoded, rows: impl IntoIterator<Item = u8>) {
        for (y, data) in rows.into_iter().enumerate() {
            out.extend_from_slice(&[header(OUT_ROW, y as u8), data]);
        }
    }

    fn adc_enable(out: &mut Encoded, sensor: u8, enable: bool) {
        for port in [sensor * 2, sensor * 2 + 1] {
            out.extend_from_slice(&[header(OUT_ADC_ENABLE, port), enable as u8]);
        }
    }
}

impl ProtocolCodec for FortyHCodec {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::FortyH
    }

    fn bounds(&self) -> Bounds {
        Bounds::grid(Self::GRID)
    }

    fn supports(&self, feature: Feature) -> bool {
        !matches!(feature, Feature::LedRing)
    }

    fn frame_strategy(&self) -> FrameStrategy {
        FrameStrategy::Rows
    }

    fn encode_command(&self, cmd: &Command) -> Result<Encoded, ProtocolError> {
        self.check(cmd)?;

        let mut out = Encoded::new();
        match *cmd {
            Command::LedSet { x, y, on } => {
                out.extend_from_slice(&[header(OUT_LED, on as u8), PackedCoord::pack(x, y)]);
            },
            Command::LevelSet { x, y, level } => {
                let on = reduce_level_to_bit(level);
                out.extend_from_slice(&[header(OUT_LED, on as u8), PackedCoord::pack(x, y)]);
            },
            Command::LedAll { on } => Self::rows(&mut out, [if on { 0xFF } else { 0x00 }; 8]),
            Command::LevelAll { level } => {
                let data = if reduce_level_to_bit(level) { 0xFF } else { 0x00 };
                Self::rows(&mut out, [data; 8]);
            },
            Command::LedMap { rows, .. } => Self::rows(&mut out, rows),
            Command::LevelMap { ref levels, .. } => {
                let rows = levels.chunks_exact(8).map(|row| {
                    let mut cells = [0u8; 8];
                    cells.copy_from_slice(row);
                    reduce_levels_to_bitmask(&cells)
                });
                Self::rows(&mut out, rows);
            },
            Command::LedRow { y, data, .. } => {
                out.extend_from_slice(&[header(OUT_ROW, y), data]);
            },
            Command::LevelRow { y, ref levels, .. } => {
                out.extend_from_slice(&[header(OUT_ROW, y), reduce_levels_to_bitmask(levels)]);
            },
            Command::LedCol { x, data, .. } => {
                out.extend_from_slice(&[header(OUT_COL, x), data]);
            },
            Command::LevelCol { x, ref levels, .. } => {
                out.extend_from_slice(&[header(OUT_COL, x), reduce_levels_to_bitmask(levels)]);
            },
            Command::Intensity { level } => {
                out.extend_from_slice(&[header(OUT_INTENSITY, 0), level & MAX_LEVEL]);
            },
            Command::TiltEnable { sensor } => Self::adc_enable(&mut out, sensor, true),
            Command::TiltDisable { sensor } => Self::adc_enable(&mut out, sensor, false),
            Command::SetRotation(_) => {},
            Command::RingSet { .. }
            | Command::RingAll { .. }
            | Command::RingMap { .. }
            | Command::RingRange { .. } => {
                // check() 已拒绝
                return Err(ProtocolError::Unsupported {
                    variant: "40h",
                    what: cmd.name(),
                });
            },
        }
        Ok(out)
    }

    fn decode_bytes(&mut self, buf: &[u8]) -> Decoded {
        let mut decoded = Decoded::default();
        for msg in buf.chunks_exact(MSG_LEN) {
            let (opcode, arg) = (msg[0] >> 4, msg[0] & 0x0F);
            let inbound = match opcode {
                IN_KEY => {
                    let (x, y) = PackedCoord::unpack(msg[1]);
                    let event = if arg & 1 == 1 {
                        Event::ButtonDown { x, y }
                    } else {
                        Event::ButtonUp { x, y }
                    };
                    Inbound::Event(event)
                },
                IN_ADC => Inbound::Event(self.tilt.update(arg, msg[1])),
                _ => Inbound::Ignored(msg[0]),
            };
            decoded.messages.push(inbound);
            decoded.consumed += MSG_LEN;
        }
        decoded
    }
}

impl DeviceCodec for FortyHCodec {
    fn decode_command(&self, buf: &[u8]) -> DecodedCommands {
        let mut decoded = DecodedCommands::default();
        for msg in buf.chunks_exact(MSG_LEN) {
            let (opcode, arg, data) = (msg[0] >> 4, msg[0] & 0x0F, msg[1]);
            let command = match opcode {
                OUT_LED => {
                    let (x, y) = PackedCoord::unpack(data);
                    Some(Outbound::Command(Command::LedSet {
                        x,
                        y,
                        on: arg & 1 == 1,
                    }))
                },
                OUT_INTENSITY => Some(Outbound::Command(Command::Intensity { level: data & 0x0F })),
                OUT_ROW => Some(Outbound::Command(Command::LedRow {
                    x_off: 0,
                    y: arg,
                    data,
                })),
                OUT_COL => Some(Outbound::Command(Command::LedCol {
                    x: arg,
                    y_off: 0,
                    data,
                })),
                // 每个传感器两个口，只在偶数口上还原一次
                OUT_ADC_ENABLE if arg % 2 == 0 => {
                    let sensor = arg / 2;
                    Some(Outbound::Command(if data & 1 == 1 {
                        Command::TiltEnable { sensor }
                    } else {
                        Command::TiltDisable { sensor }
                    }))
                },
                OUT_ADC_ENABLE => None,
                _ => Some(Outbound::Unknown(msg[0])),
            };
            decoded.messages.extend(command);
            decoded.consumed += MSG_LEN;
        }
        decoded
    }

    fn encode_event(&self, event: &Event) -> Result<Encoded, ProtocolError> {
        match *event {
            Event::ButtonDown { x, y } | Event::ButtonUp { x, y } => {
                let down = matches!(event, Event::ButtonDown { .. });
                Ok(smallvec![header(IN_KEY, down as u8), PackedCoord::pack(x, y)])
            },
            Event::Tilt { .. } => {
                let mut out = Encoded::new();
                for (port, value) in tilt_to_aux(event, ProtocolVariant::FortyH)? {
                    out.extend_from_slice(&[header(IN_ADC, port), value]);
                }
                Ok(out)
            },
            _ => Err(ProtocolError::Unsupported {
                variant: "40h",
                what: "encoder",
            }),
        }
    }

    fn encode_reply(&self, _reply: &SystemReply) -> Result<Encoded, ProtocolError> {
        Err(ProtocolError::Unsupported {
            variant: "40h",
            what: "system reply",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(cmd: Command) -> Vec<u8> {
        FortyHCodec::new().encode_command(&cmd).unwrap().to_vec()
    }

    #[test]
    fn test_led_set() {
        assert_eq!(encode(Command::LedSet { x: 3, y: 5, on: true }), vec![0x21, 0x35]);
        assert_eq!(encode(Command::LedSet { x: 7, y: 0, on: false }), vec![0x20, 0x70]);
    }

    #[test]
    fn test_row_and_col() {
        assert_eq!(encode(Command::LedRow { x_off: 0, y: 0, data: 0xFF }), vec![0x70, 0xFF]);
        assert_eq!(encode(Command::LedCol { x: 2, y_off: 0, data: 0x81 }), vec![0x82, 0x81]);
    }

    #[test]
    fn test_led_all_emulated_as_rows() {
        let bytes = encode(Command::LedAll { on: true });
        assert_eq!(bytes.len(), 16);
        for (y, msg) in bytes.chunks(2).enumerate() {
            assert_eq!(msg, [0x70 | y as u8, 0xFF]);
        }
    }

    #[test]
    fn test_levels_reduced_to_monobright() {
        assert_eq!(encode(Command::LevelSet { x: 1, y: 1, level: 8 }), vec![0x21, 0x11]);
        assert_eq!(encode(Command::LevelSet { x: 1, y: 1, level: 7 }), vec![0x20, 0x11]);
        assert_eq!(
            encode(Command::LevelRow {
                x_off: 0,
                y: 2,
                levels: [0, 1, 4, 7, 8, 9, 15, 15]
            }),
            vec![0x72, 0xF0]
        );

        let mut levels = [0u8; 64];
        levels[8..16].fill(15);
        let bytes = encode(Command::LevelMap {
            x_off: 0,
            y_off: 0,
            levels,
        });
        assert_eq!(&bytes[..4], &[0x70, 0x00, 0x71, 0xFF]);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let codec = FortyHCodec::new();
        let err = codec
            .encode_command(&Command::LedSet { x: 8, y: 0, on: true })
            .unwrap_err();
        assert!(err.is_validation());
        let err = codec
            .encode_command(&Command::LedRow { x_off: 8, y: 0, data: 1 })
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_decode_keys() {
        let mut codec = FortyHCodec::new();
        let decoded = codec.decode_bytes(&[0x01, 0x34, 0x00, 0x34, 0x01]);
        assert_eq!(decoded.consumed, 4);
        let events: Vec<_> = decoded.events().copied().collect();
        assert_eq!(
            events,
            vec![Event::ButtonDown { x: 3, y: 4 }, Event::ButtonUp { x: 3, y: 4 }]
        );
    }

    #[test]
    fn test_adc_tilt() {
        let codec = FortyHCodec::new();
        assert_eq!(
            codec.encode_command(&Command::TiltEnable { sensor: 0 }).unwrap().to_vec(),
            vec![0x50, 0x01, 0x51, 0x01]
        );

        let mut codec = FortyHCodec::new();
        let decoded = codec.decode_bytes(&[0x10, 0x40, 0x11, 0x80]);
        assert_eq!(
            decoded.events().last(),
            Some(&Event::Tilt {
                sensor: 0,
                x: 0x40,
                y: 0x80,
                z: 0
            })
        );
    }

    #[test]
    fn test_device_side_decode() {
        let codec = FortyHCodec::new();
        let decoded = codec.decode_command(&[0x70, 0xFF, 0x50, 0x01, 0x51, 0x01, 0x30]);
        assert_eq!(decoded.consumed, 6);
        assert_eq!(
            decoded.messages,
            vec![
                Outbound::Command(Command::LedRow {
                    x_off: 0,
                    y: 0,
                    data: 0xFF
                }),
                Outbound::Command(Command::TiltEnable { sensor: 0 }),
            ]
        );
    }

    #[test]
    fn test_ring_unsupported() {
        let err = FortyHCodec::new()
            .encode_command(&Command::RingSet { ring: 0, led: 0, level: 1 })
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Unsupported { .. }));
    }
}
