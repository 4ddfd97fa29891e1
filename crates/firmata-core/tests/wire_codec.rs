//! Integration tests for the firmata-core wire codec, frame decoder and pin
//! registry.
//!
//! These tests drive the public API the way the client engine does: raw board
//! traffic goes through [`FrameDecoder`], decoded messages update a
//! [`PinRegistry`], and outbound commands are checked byte for byte.

use firmata_core::protocol::codec::{
    decode_u14, encode_command, encode_u14, from_7bit, to_7bit, wrap_sysex,
};
use firmata_core::protocol::messages::{sysex, Command, Message, SysexMessage};
use firmata_core::{FrameDecoder, PinMode, PinRegistry, ProtocolError};

/// Capability body for an Uno-like board: pins 0-13 input/output (3, 5, 6, 9,
/// 10, 11 also PWM), pins 14-19 input/output/analog.
fn uno_capabilities() -> Vec<u8> {
    let mut body = Vec::new();
    for pin in 0..20 {
        body.extend_from_slice(&[0x00, 0x01, 0x01, 0x01]);
        if [3, 5, 6, 9, 10, 11].contains(&pin) {
            body.extend_from_slice(&[0x03, 0x08]);
        }
        if pin >= 14 {
            body.extend_from_slice(&[0x02, 0x0A]);
        }
        body.push(0x7F);
    }
    body
}

fn uno_mapping() -> Vec<u8> {
    (0..20u8).map(|pin| if pin >= 14 { pin - 14 } else { 0x7F }).collect()
}

/// Decodes a stream and asserts every frame decoded cleanly.
fn decode_all(bytes: &[u8]) -> Vec<Message> {
    let mut decoder = FrameDecoder::new();
    decoder
        .decode(bytes)
        .into_iter()
        .map(|r| r.expect("frame must decode"))
        .collect()
}

// ── 7-bit encoding ────────────────────────────────────────────────────────────

#[test]
fn test_every_byte_round_trips_through_7bit_pair() {
    for b in 0..=255u8 {
        let (lsb, msb) = to_7bit(b);
        assert_eq!(from_7bit(lsb, msb), u16::from(b), "byte {b}");
    }
}

#[test]
fn test_every_14bit_value_round_trips() {
    for v in 0..=16_383u16 {
        let encoded = encode_u14(v);
        assert!(encoded.iter().all(|b| b & 0x80 == 0));
        assert_eq!(decode_u14(encoded), v, "value {v}");
    }
}

#[test]
fn test_encoded_commands_keep_payload_bytes_7bit_clean() {
    let commands = [
        Command::DigitalMessage { port: 0, bits: 0xFF },
        Command::AnalogMessage { pin: 3, value: 0x3FFF },
        Command::SamplingInterval { millis: 0xFFFF },
        Command::StringData("\u{00ff}".to_string()),
        Command::I2cWrite {
            address: 0x77,
            data: vec![0xFF, 0x80],
        },
    ];
    for command in &commands {
        let bytes = encode_command(command);
        let payload = match bytes.first() {
            Some(0xF0) => &bytes[1..bytes.len() - 1],
            _ => &bytes[1..],
        };
        assert!(
            payload.iter().all(|b| b & 0x80 == 0),
            "{} payload must be 7-bit clean: {bytes:02X?}",
            command.name()
        );
    }
}

// ── Frame decoding ────────────────────────────────────────────────────────────

#[test]
fn test_handshake_replies_decode_in_order() {
    let mut stream = vec![0xF9, 0x02, 0x05];
    stream.extend(wrap_sysex(sysex::REPORT_FIRMWARE, &[0x02, 0x05, b'F', 0x00]));
    stream.extend(wrap_sysex(sysex::CAPABILITY_RESPONSE, &uno_capabilities()));
    stream.extend(wrap_sysex(sysex::ANALOG_MAPPING_RESPONSE, &uno_mapping()));

    let messages = decode_all(&stream);

    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0], Message::ProtocolVersion { major: 2, minor: 5 });
    assert!(matches!(
        &messages[1],
        Message::Sysex(SysexMessage::FirmwareResponse(info)) if info.name == "F"
    ));
    assert!(matches!(
        &messages[2],
        Message::Sysex(SysexMessage::CapabilityResponse(pins)) if pins.len() == 20
    ));
    assert!(matches!(
        &messages[3],
        Message::Sysex(SysexMessage::AnalogMappingResponse(map)) if map.len() == 20
    ));
}

#[test]
fn test_decoder_handles_one_byte_at_a_time() {
    let stream = [0xE2, 0x10, 0x03, 0x92, 0x05, 0x00];
    let mut decoder = FrameDecoder::new();
    let mut messages = Vec::new();
    for byte in stream {
        messages.extend(decoder.decode(&[byte]));
    }
    assert_eq!(
        messages,
        vec![
            Ok(Message::AnalogChannelUpdate { channel: 2, value: 0x190 }),
            Ok(Message::DigitalPortUpdate { port: 2, bits: 0x05 }),
        ]
    );
}

#[test]
fn test_decoder_resyncs_after_truncated_sysex() {
    let mut stream = vec![0xF0, 0x6C, 0x00, 0x01];
    stream.extend_from_slice(&[0xF9, 0x02, 0x05]);
    let mut decoder = FrameDecoder::new();
    let out = decoder.decode(&stream);
    assert!(matches!(out[0], Err(ProtocolError::InterruptedFrame { .. })));
    assert_eq!(out[1], Ok(Message::ProtocolVersion { major: 2, minor: 5 }));
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[test]
fn test_capability_parse_is_idempotent() {
    let mut registry = PinRegistry::new();
    registry.apply_capability_response(&uno_capabilities()).unwrap();
    let first: Vec<_> = registry.pins().iter().map(|p| p.supported).collect();

    registry.apply_capability_response(&uno_capabilities()).unwrap();
    let second: Vec<_> = registry.pins().iter().map(|p| p.supported).collect();

    assert_eq!(first.len(), 20);
    assert_eq!(first, second);
}

#[test]
fn test_analog_mapping_is_a_partial_bijection() {
    let mut registry = PinRegistry::new();
    registry.apply_capability_response(&uno_capabilities()).unwrap();
    registry.apply_analog_mapping_response(&uno_mapping()).unwrap();

    let mut seen = std::collections::HashSet::new();
    for (index, pin) in registry.pins().iter().enumerate() {
        if let Some(channel) = pin.analog_channel {
            assert_eq!(registry.pin_for_channel(channel), Some(index));
            assert!(seen.insert(channel), "channel {channel} assigned twice");
        }
    }
    assert_eq!(seen.len(), 6);
}

#[test]
fn test_digital_port_packing_combines_writes() {
    let mut registry = PinRegistry::new();
    registry.apply_capability_response(&uno_capabilities()).unwrap();

    registry.set_digital_bit(12, true).unwrap();
    registry.set_digital_bit(13, true).unwrap();
    let bits = registry.set_digital_bit(12, false).unwrap();

    assert_eq!(
        encode_command(&Command::DigitalMessage { port: 1, bits }),
        vec![0x91, 0b0010_0000, 0x00]
    );
}

#[test]
fn test_unsupported_mode_is_rejected_before_any_command() {
    let mut registry = PinRegistry::new();
    registry.apply_capability_response(&uno_capabilities()).unwrap();
    assert!(registry.set_mode(2, PinMode::Analog).is_err());
    assert!(registry.set_mode(14, PinMode::Analog).is_ok());
}

#[test]
fn test_inbound_frames_update_registry() {
    let mut registry = PinRegistry::new();
    registry.apply_capability_response(&uno_capabilities()).unwrap();
    registry.apply_analog_mapping_response(&uno_mapping()).unwrap();
    registry.set_mode(2, PinMode::Input).unwrap();

    for message in decode_all(&[0x90, 0x7F, 0x01, 0xE1, 0x00, 0x04]) {
        match message {
            Message::DigitalPortUpdate { port, bits } => {
                registry.apply_digital_port(port, bits);
            }
            Message::AnalogChannelUpdate { channel, value } => {
                registry.apply_analog_channel(channel, value);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    assert_eq!(registry.pins()[2].value, 1);
    assert_eq!(registry.pins()[3].value, 0, "output pin must not follow input frames");
    assert_eq!(registry.pins()[15].value, 512);
}
