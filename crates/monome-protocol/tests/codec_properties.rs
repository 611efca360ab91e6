//! 编解码器属性测试
//!
//! - 主机编码 -> 设备解码 的指令往返
//! - 设备编码 -> 主机解码 的事件往返
//! - 任意位置切分输入字节后解码结果不变

use monome_protocol::*;
use proptest::prelude::*;

fn level() -> impl Strategy<Value = u8> {
    0u8..=15
}

fn offset() -> impl Strategy<Value = u8> {
    prop_oneof![Just(0u8), Just(8u8)]
}

/// 40h 可原生表达的指令
fn forty_h_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        (0u8..8, 0u8..8, any::<bool>()).prop_map(|(x, y, on)| Command::LedSet { x, y, on }),
        (0u8..8, any::<u8>()).prop_map(|(y, data)| Command::LedRow { x_off: 0, y, data }),
        (0u8..8, any::<u8>()).prop_map(|(x, data)| Command::LedCol { x, y_off: 0, data }),
        level().prop_map(|level| Command::Intensity { level }),
        Just(Command::TiltEnable { sensor: 0 }),
        Just(Command::TiltDisable { sensor: 0 }),
    ]
}

/// series 可原生表达的指令（16x16）
fn series_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        (0u8..16, 0u8..16, any::<bool>()).prop_map(|(x, y, on)| Command::LedSet { x, y, on }),
        any::<bool>().prop_map(|on| Command::LedAll { on }),
        (offset(), offset(), any::<[u8; 8]>())
            .prop_map(|(x_off, y_off, rows)| Command::LedMap { x_off, y_off, rows }),
        (0u8..16, any::<u8>()).prop_map(|(y, data)| Command::LedRow { x_off: 0, y, data }),
        (0u8..16, any::<u8>()).prop_map(|(x, data)| Command::LedCol { x, y_off: 0, data }),
        level().prop_map(|level| Command::Intensity { level }),
        Just(Command::TiltEnable { sensor: 0 }),
    ]
}

fn levels64() -> impl Strategy<Value = [u8; 64]> {
    prop::collection::vec(level(), 64).prop_map(|v| {
        let mut levels = [0u8; 64];
        levels.copy_from_slice(&v);
        levels
    })
}

fn levels8() -> impl Strategy<Value = [u8; 8]> {
    prop::array::uniform8(level())
}

/// mext grid 指令
fn mext_grid_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        (0u8..16, 0u8..16, any::<bool>()).prop_map(|(x, y, on)| Command::LedSet { x, y, on }),
        any::<bool>().prop_map(|on| Command::LedAll { on }),
        (offset(), offset(), any::<[u8; 8]>())
            .prop_map(|(x_off, y_off, rows)| Command::LedMap { x_off, y_off, rows }),
        (offset(), 0u8..16, any::<u8>())
            .prop_map(|(x_off, y, data)| Command::LedRow { x_off, y, data }),
        (0u8..16, offset(), any::<u8>())
            .prop_map(|(x, y_off, data)| Command::LedCol { x, y_off, data }),
        level().prop_map(|level| Command::Intensity { level }),
        (0u8..16, 0u8..16, level()).prop_map(|(x, y, level)| Command::LevelSet { x, y, level }),
        level().prop_map(|level| Command::LevelAll { level }),
        (offset(), offset(), levels64())
            .prop_map(|(x_off, y_off, levels)| Command::LevelMap { x_off, y_off, levels }),
        (offset(), 0u8..16, levels8())
            .prop_map(|(x_off, y, levels)| Command::LevelRow { x_off, y, levels }),
        (0u8..16, offset(), levels8())
            .prop_map(|(x, y_off, levels)| Command::LevelCol { x, y_off, levels }),
        Just(Command::TiltEnable { sensor: 0 }),
        Just(Command::TiltDisable { sensor: 0 }),
    ]
}

/// mext arc 指令（4 个光环）
fn mext_arc_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        (0u8..4, 0u8..64, level()).prop_map(|(ring, led, level)| Command::RingSet {
            ring,
            led,
            level
        }),
        (0u8..4, level()).prop_map(|(ring, level)| Command::RingAll { ring, level }),
        (0u8..4, levels64()).prop_map(|(ring, levels)| Command::RingMap { ring, levels }),
        (0u8..4, 0u8..64, 0u8..64, level()).prop_map(|(ring, start, end, level)| {
            Command::RingRange {
                ring,
                start,
                end,
                level,
            }
        }),
    ]
}

fn key_event() -> impl Strategy<Value = Event> {
    (0u8..16, 0u8..16, any::<bool>()).prop_map(|(x, y, down)| {
        if down {
            Event::ButtonDown { x, y }
        } else {
            Event::ButtonUp { x, y }
        }
    })
}

fn mext_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        key_event(),
        (0u8..4, any::<i8>()).prop_map(|(ring, delta)| Event::EncoderDelta { ring, delta }),
        (0u8..4).prop_map(|ring| Event::EncoderKeyDown { ring }),
        (0u8..4).prop_map(|ring| Event::EncoderKeyUp { ring }),
        (0u8..2, any::<i16>(), any::<i16>(), any::<i16>())
            .prop_map(|(sensor, x, y, z)| Event::Tilt { sensor, x, y, z }),
    ]
}

fn assert_command_roundtrip(codec: &Codec, cmd: &Command) -> Result<(), TestCaseError> {
    let bytes = codec.encode_command(cmd).map_err(|e| TestCaseError::fail(e.to_string()))?;
    let decoded = codec.decode_command(&bytes);
    prop_assert_eq!(decoded.consumed, bytes.len());
    prop_assert_eq!(decoded.commands().cloned().collect::<Vec<_>>(), vec![cmd.clone()]);
    Ok(())
}

fn decode_all(codec: &mut Codec, bytes: &[u8]) -> Vec<Inbound> {
    let decoded = codec.decode_bytes(bytes);
    assert_eq!(decoded.consumed, bytes.len());
    decoded.messages
}

proptest! {
    #[test]
    fn forty_h_command_roundtrip(cmd in forty_h_command()) {
        assert_command_roundtrip(&Codec::new(ProtocolVariant::FortyH), &cmd)?;
    }

    #[test]
    fn series_command_roundtrip(cmd in series_command()) {
        assert_command_roundtrip(&Codec::new(ProtocolVariant::Series), &cmd)?;
    }

    #[test]
    fn mext_grid_command_roundtrip(cmd in mext_grid_command()) {
        assert_command_roundtrip(&Codec::new(ProtocolVariant::Mext), &cmd)?;
    }

    #[test]
    fn mext_arc_command_roundtrip(cmd in mext_arc_command()) {
        let codec = Codec::with_bounds(ProtocolVariant::Mext, Bounds::arc(4));
        assert_command_roundtrip(&codec, &cmd)?;
    }

    #[test]
    fn key_event_roundtrip_all_variants(ev in key_event()) {
        for variant in [ProtocolVariant::FortyH, ProtocolVariant::Series, ProtocolVariant::Mext] {
            let mut codec = Codec::new(variant);
            let bytes = codec.encode_event(&ev).unwrap();
            prop_assert_eq!(decode_all(&mut codec, &bytes), vec![Inbound::Event(ev)]);
        }
    }

    #[test]
    fn mext_event_roundtrip(ev in mext_event()) {
        let mut codec = Codec::new(ProtocolVariant::Mext);
        let bytes = codec.encode_event(&ev).unwrap();
        prop_assert_eq!(decode_all(&mut codec, &bytes), vec![Inbound::Event(ev)]);
    }

    /// 旧协议的 tilt 拆成两个模拟口，最后一个事件携带完整采样
    #[test]
    fn aux_tilt_roundtrip(sensor in 0u8..4, x in 0i16..=255, y in 0i16..=255) {
        let ev = Event::Tilt { sensor, x, y, z: 0 };
        for variant in [ProtocolVariant::FortyH, ProtocolVariant::Series] {
            let mut codec = Codec::new(variant);
            let bytes = codec.encode_event(&ev).unwrap();
            let messages = decode_all(&mut codec, &bytes);
            prop_assert_eq!(messages.last(), Some(&Inbound::Event(ev)));
        }
    }

    #[test]
    fn decode_is_resumable(events in prop::collection::vec(mext_event(), 1..12), split in 0usize..512) {
        let device = Codec::new(ProtocolVariant::Mext);
        let mut bytes = Vec::new();
        for ev in &events {
            bytes.extend_from_slice(&device.encode_event(ev).unwrap());
        }
        let split = split % (bytes.len() + 1);

        let mut whole = Codec::new(ProtocolVariant::Mext);
        let expected = whole.decode_bytes(&bytes).messages;

        let mut parts = Codec::new(ProtocolVariant::Mext);
        let first = parts.decode_bytes(&bytes[..split]);
        let mut pending = bytes[first.consumed..split].to_vec();
        pending.extend_from_slice(&bytes[split..]);
        let second = parts.decode_bytes(&pending);

        let mut got = first.messages;
        got.extend(second.messages);
        prop_assert_eq!(got, expected);
        prop_assert_eq!(first.consumed + second.consumed, bytes.len());
    }

    #[test]
    fn series_decode_is_resumable(
        samples in prop::collection::vec((0u8..16, any::<u8>()), 1..16),
        split in 0usize..64,
    ) {
        let mut bytes = Vec::new();
        for (port, value) in &samples {
            bytes.extend_from_slice(&[0xE0 | port, *value]);
        }
        let split = split % (bytes.len() + 1);

        let mut whole = Codec::new(ProtocolVariant::Series);
        let expected = whole.decode_bytes(&bytes).messages;

        let mut parts = Codec::new(ProtocolVariant::Series);
        let first = parts.decode_bytes(&bytes[..split]);
        let mut pending = bytes[first.consumed..split].to_vec();
        pending.extend_from_slice(&bytes[split..]);
        let mut got = first.messages;
        got.extend(parts.decode_bytes(&pending).messages);
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn out_of_range_always_rejected(x in 8u8..=255, y in 0u8..8) {
        let codec = Codec::new(ProtocolVariant::FortyH);
        let err = codec.encode_command(&Command::LedSet { x, y, on: true }).unwrap_err();
        prop_assert!(err.is_validation());
    }
}

#[test]
fn refresh_row_example_40h() {
    let codec = Codec::new(ProtocolVariant::FortyH);
    let bytes = codec
        .encode_command(&Command::LedRow {
            x_off: 0,
            y: 0,
            data: 0xFF,
        })
        .unwrap();
    assert_eq!(bytes.as_slice(), &[0x70, 0xFF]);
    let decoded = codec.decode_command(&bytes);
    assert_eq!(
        decoded.commands().next(),
        Some(&Command::LedRow {
            x_off: 0,
            y: 0,
            data: 0xFF
        })
    );
}
