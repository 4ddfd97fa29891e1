//! Wire codec for the Firmata protocol.
//!
//! Firmata is MIDI-derived: every byte with bit 7 set is a command byte and
//! every payload byte must keep bit 7 clear. Values wider than 7 bits are
//! therefore split into little-endian groups of 7 bits:
//!
//! ```text
//! 8-bit byte   b  →  [b & 0x7F, (b >> 7) & 0x7F]
//! 14-bit value v  →  [v & 0x7F, (v >> 7) & 0x7F]
//! ```
//!
//! Sysex frames wrap a sub-command id and its payload:
//!
//! ```text
//! [0xF0][id][payload...][0xF7]
//! ```
//!
//! All functions here are pure; the streaming side lives in
//! [`crate::protocol::decoder`].

use thiserror::Error;

use crate::domain::pins::PinMode;
use crate::protocol::messages::{
    serial, spi, sysex, Command, CommandKind, FirmwareInfo, I2cMode, I2cReply, ModeCapability,
    PinCapabilities, SerialPort, SysexMessage, ANALOG_MESSAGE, DIGITAL_MESSAGE, END_SYSEX,
    NO_CHANNEL, PROTOCOL_VERSION, REPORT_ANALOG, REPORT_DIGITAL, SET_PIN_MODE, START_SYSEX,
    SYSTEM_RESET,
};

/// Errors that can occur while decoding frames received from the board.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A sysex frame contained no sub-command id.
    #[error("empty sysex frame")]
    EmptySysex,

    /// A sysex payload is shorter than its sub-command requires.
    #[error("{context}: need at least {needed} bytes, got {available}")]
    InsufficientData {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    /// The payload could not be parsed (odd pair count, bad mode, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A command byte arrived before the current frame was complete.
    #[error("frame 0x{command:02X} interrupted by command byte 0x{interrupted_by:02X}")]
    InterruptedFrame { command: u8, interrupted_by: u8 },

    /// A command byte the board is not expected to send.
    #[error("unexpected command byte 0x{0:02X}")]
    UnexpectedCommand(u8),

    /// The stream ended inside a sysex frame.
    #[error("stream ended inside a sysex frame after {0} byte(s)")]
    PrematureEof(usize),

    /// The analog-mapping response lists fewer pins than the registry holds.
    #[error("analog mapping covers {got} pin(s) but the board reported {expected}")]
    ShortAnalogMapping { expected: usize, got: usize },

    /// Two pins claim the same analog channel.
    #[error("analog channel {channel} claimed by pins {first} and {second}")]
    DuplicateChannel {
        channel: u8,
        first: usize,
        second: usize,
    },
}

// ── 7-bit helpers ─────────────────────────────────────────────────────────────

/// Splits a byte into its `(lsb7, msb7)` wire pair.
///
/// # Examples
///
/// ```rust
/// use firmata_core::protocol::codec::{from_7bit, to_7bit};
///
/// assert_eq!(to_7bit(0xFF), (0x7F, 0x01));
/// assert_eq!(from_7bit(0x7F, 0x01), 0xFF);
/// ```
pub fn to_7bit(byte: u8) -> (u8, u8) {
    (byte & 0x7F, (byte >> 7) & 0x7F)
}

/// Joins a `(lsb7, msb7)` wire pair back into a value of up to 14 bits.
///
/// Bit 7 of either input is ignored, so stray high bits never leak into the
/// result.
pub fn from_7bit(lsb: u8, msb: u8) -> u16 {
    u16::from(lsb & 0x7F) | (u16::from(msb & 0x7F) << 7)
}

/// Encodes a 14-bit value as two 7-bit bytes. Bits above 13 are discarded.
pub fn encode_u14(value: u16) -> [u8; 2] {
    [(value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
}

/// Decodes two 7-bit bytes into a 14-bit value.
pub fn decode_u14(bytes: [u8; 2]) -> u16 {
    from_7bit(bytes[0], bytes[1])
}

/// Encodes `value` as exactly `groups` little-endian 7-bit groups.
pub fn encode_7bit_groups(value: u32, groups: usize) -> Vec<u8> {
    (0..groups)
        .map(|i| {
            let shift = 7 * i as u32;
            if shift >= 32 {
                0
            } else {
                ((value >> shift) & 0x7F) as u8
            }
        })
        .collect()
}

/// Decodes little-endian 7-bit groups into an integer.
///
/// At most the first four groups (28 bits) are used.
pub fn decode_7bit_groups(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .enumerate()
        .fold(0u32, |acc, (i, b)| acc | (u32::from(b & 0x7F) << (7 * i)))
}

/// Appends every byte of `data` as a `(lsb7, msb7)` pair.
pub fn push_pairs(buf: &mut Vec<u8>, data: &[u8]) {
    for &byte in data {
        let (lsb, msb) = to_7bit(byte);
        buf.push(lsb);
        buf.push(msb);
    }
}

/// Decodes a run of `(lsb7, msb7)` pairs back into bytes.
///
/// A dangling final byte (odd-length input) is dropped.
pub fn decode_pairs(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(2)
        .map(|pair| from_7bit(pair[0], pair[1]) as u8)
        .collect()
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// Classifies `byte`. Returns `None` for data bytes (bit 7 clear).
pub fn classify(byte: u8) -> Option<CommandKind> {
    if byte & 0x80 == 0 {
        return None;
    }
    let kind = match byte & 0xF0 {
        DIGITAL_MESSAGE => CommandKind::DigitalMessage { port: byte & 0x0F },
        ANALOG_MESSAGE => CommandKind::AnalogMessage { channel: byte & 0x0F },
        REPORT_ANALOG => CommandKind::ReportAnalog { channel: byte & 0x0F },
        REPORT_DIGITAL => CommandKind::ReportDigital { port: byte & 0x0F },
        _ => match byte {
            START_SYSEX => CommandKind::StartSysex,
            END_SYSEX => CommandKind::EndSysex,
            SET_PIN_MODE => CommandKind::SetPinMode,
            PROTOCOL_VERSION => CommandKind::ProtocolVersion,
            SYSTEM_RESET => CommandKind::SystemReset,
            other => CommandKind::Unknown(other),
        },
    };
    Some(kind)
}

/// Wraps a sub-command id and payload in `0xF0 … 0xF7`.
pub fn wrap_sysex(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(START_SYSEX);
    frame.push(id);
    frame.extend_from_slice(payload);
    frame.push(END_SYSEX);
    frame
}

/// Strips the `0xF0`/`0xF7` delimiters from a complete sysex frame and
/// returns `(id, payload)`.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the delimiters are missing
/// and [`ProtocolError::EmptySysex`] if no sub-command id is present.
pub fn unwrap_sysex(frame: &[u8]) -> Result<(u8, &[u8]), ProtocolError> {
    match frame {
        [START_SYSEX, inner @ .., END_SYSEX] => match inner {
            [id, payload @ ..] => Ok((*id, payload)),
            [] => Err(ProtocolError::EmptySysex),
        },
        _ => Err(ProtocolError::MalformedPayload(
            "sysex frame must start with 0xF0 and end with 0xF7".to_string(),
        )),
    }
}

// ── Command encoding ──────────────────────────────────────────────────────────

/// Encodes an outbound [`Command`] into its exact wire bytes.
///
/// # Examples
///
/// ```rust
/// use firmata_core::protocol::codec::encode_command;
/// use firmata_core::protocol::messages::Command;
///
/// assert_eq!(encode_command(&Command::SystemReset), vec![0xFF]);
/// assert_eq!(
///     encode_command(&Command::DigitalMessage { port: 1, bits: 0x81 }),
///     vec![0x91, 0x01, 0x01]
/// );
/// ```
pub fn encode_command(command: &Command) -> Vec<u8> {
    match command {
        Command::SystemReset => vec![SYSTEM_RESET],
        Command::ProtocolVersionQuery => vec![PROTOCOL_VERSION],
        Command::SetPinMode { pin, mode } => vec![SET_PIN_MODE, pin & 0x7F, *mode as u8],
        Command::DigitalMessage { port, bits } => {
            let (lsb, msb) = to_7bit(*bits);
            vec![DIGITAL_MESSAGE | (port & 0x0F), lsb, msb]
        }
        Command::AnalogMessage { pin, value } => {
            let [lsb, msb] = encode_u14(*value);
            vec![ANALOG_MESSAGE | (pin & 0x0F), lsb, msb]
        }
        Command::ExtendedAnalog { pin, value } => {
            let mut payload = vec![pin & 0x7F];
            payload.extend(encode_7bit_groups(*value, groups_needed(*value).max(2)));
            wrap_sysex(sysex::EXTENDED_ANALOG, &payload)
        }
        Command::ReportAnalog { channel, enabled } => {
            vec![REPORT_ANALOG | (channel & 0x0F), u8::from(*enabled)]
        }
        Command::ReportDigital { port, enabled } => {
            vec![REPORT_DIGITAL | (port & 0x0F), u8::from(*enabled)]
        }
        Command::FirmwareQuery => wrap_sysex(sysex::REPORT_FIRMWARE, &[]),
        Command::CapabilityQuery => wrap_sysex(sysex::CAPABILITY_QUERY, &[]),
        Command::AnalogMappingQuery => wrap_sysex(sysex::ANALOG_MAPPING_QUERY, &[]),
        Command::PinStateQuery { pin } => wrap_sysex(sysex::PIN_STATE_QUERY, &[pin & 0x7F]),
        Command::SamplingInterval { millis } => {
            wrap_sysex(sysex::SAMPLING_INTERVAL, &encode_u14(*millis))
        }
        Command::ServoConfig {
            pin,
            min_pulse,
            max_pulse,
        } => {
            let mut payload = vec![pin & 0x7F];
            payload.extend_from_slice(&encode_u14(*min_pulse));
            payload.extend_from_slice(&encode_u14(*max_pulse));
            wrap_sysex(sysex::SERVO_CONFIG, &payload)
        }
        Command::StringData(text) => {
            let mut payload = Vec::with_capacity(text.len() * 2);
            push_pairs(&mut payload, text.as_bytes());
            wrap_sysex(sysex::STRING_DATA, &payload)
        }
        Command::I2cConfig { delay_us } => wrap_sysex(sysex::I2C_CONFIG, &encode_u14(*delay_us)),
        Command::I2cWrite { address, data } => {
            let mut payload = i2c_header(*address, I2cMode::Write);
            push_pairs(&mut payload, data);
            wrap_sysex(sysex::I2C_REQUEST, &payload)
        }
        Command::I2cRead {
            address,
            register,
            count,
            mode,
        } => {
            let mut payload = i2c_header(*address, *mode);
            if let Some(register) = register {
                payload.extend_from_slice(&encode_u14(*register));
            }
            payload.extend_from_slice(&encode_u14(*count));
            wrap_sysex(sysex::I2C_REQUEST, &payload)
        }
        Command::I2cStopReading { address } => {
            wrap_sysex(sysex::I2C_REQUEST, &i2c_header(*address, I2cMode::StopReading))
        }
        Command::SerialConfig {
            port,
            baud,
            buffer_size,
            terminator,
        } => {
            let mut payload = vec![serial::CONFIG | *port as u8];
            payload.extend(encode_7bit_groups(*baud, 3));
            payload.extend(encode_7bit_groups(*buffer_size, 3));
            push_pairs(&mut payload, &[*terminator]);
            wrap_sysex(sysex::SERIAL, &payload)
        }
        Command::SerialWrite { port, data } => {
            let mut payload = vec![serial::COMM | *port as u8];
            push_pairs(&mut payload, data);
            wrap_sysex(sysex::SERIAL, &payload)
        }
        Command::SerialFlush { port } => wrap_sysex(sysex::SERIAL, &[serial::FLUSH | *port as u8]),
        Command::SerialClose { port } => wrap_sysex(sysex::SERIAL, &[serial::CLOSE | *port as u8]),
        Command::SpiConfig { chip_select, mode } => {
            let mut payload = vec![spi::CONFIG];
            push_pairs(&mut payload, &[*chip_select, *mode as u8]);
            wrap_sysex(sysex::SPI, &payload)
        }
        Command::SpiTransfer { chip_select, data } => {
            let mut payload = vec![spi::COMM];
            push_pairs(&mut payload, &[*chip_select]);
            push_pairs(&mut payload, data);
            wrap_sysex(sysex::SPI, &payload)
        }
    }
}

/// Address/mode header shared by every I2C request. Addresses above 0x7F
/// switch the request into 10-bit addressing (bit 5).
fn i2c_header(address: u16, mode: I2cMode) -> Vec<u8> {
    let mut second = ((address >> 7) & 0x07) as u8 | ((mode as u8) << 3);
    if address > 0x7F {
        second |= 0x20;
    }
    vec![(address & 0x7F) as u8, second]
}

fn groups_needed(value: u32) -> usize {
    let bits = 32 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// A pin-state response carries at most three 7-bit groups of state.
const PIN_STATE_GROUPS: usize = 3;

// ── Sysex decoding ────────────────────────────────────────────────────────────

/// Decodes the contents of a sysex frame (without `0xF0`/`0xF7`).
///
/// # Errors
///
/// Returns [`ProtocolError`] if the payload is empty or too short for its
/// sub-command.
pub fn decode_sysex(payload: &[u8]) -> Result<SysexMessage, ProtocolError> {
    let (&id, body) = payload.split_first().ok_or(ProtocolError::EmptySysex)?;
    match id {
        sysex::CAPABILITY_RESPONSE => parse_capabilities(body).map(SysexMessage::CapabilityResponse),
        sysex::ANALOG_MAPPING_RESPONSE => Ok(SysexMessage::AnalogMappingResponse(body.to_vec())),
        sysex::PIN_STATE_RESPONSE => {
            require_len(body, 2, "PinStateResponse")?;
            Ok(SysexMessage::PinStateResponse {
                pin: body[0],
                mode: body[1],
                state: decode_7bit_groups(&body[2..body.len().min(2 + PIN_STATE_GROUPS)]),
            })
        }
        sysex::REPORT_FIRMWARE => {
            require_len(body, 2, "FirmwareResponse")?;
            let name: Vec<u8> = body[2..].iter().copied().filter(|&b| b != 0).collect();
            Ok(SysexMessage::FirmwareResponse(FirmwareInfo {
                major: body[0],
                minor: body[1],
                name: String::from_utf8_lossy(&name).into_owned(),
            }))
        }
        sysex::I2C_REPLY => {
            require_len(body, 4, "I2cReply")?;
            Ok(SysexMessage::I2cReply(I2cReply {
                address: from_7bit(body[0], body[1]),
                register: from_7bit(body[2], body[3]),
                data: decode_pairs(&body[4..]),
            }))
        }
        sysex::STRING_DATA => {
            let bytes = decode_pairs(body);
            let text = String::from_utf8_lossy(&bytes)
                .trim_end_matches('\0')
                .to_string();
            Ok(SysexMessage::StringData(text))
        }
        sysex::SERIAL => {
            require_len(body, 1, "SerialReply")?;
            let port = SerialPort::try_from(body[0] & 0x0F).map_err(|_| {
                ProtocolError::MalformedPayload(format!("unknown serial port: {}", body[0] & 0x0F))
            })?;
            Ok(SysexMessage::SerialReply {
                port,
                data: decode_pairs(&body[1..]),
            })
        }
        sysex::SPI => {
            require_len(body, 3, "SpiReply")?;
            Ok(SysexMessage::SpiReply {
                chip_select: from_7bit(body[1], body[2]) as u8,
                data: decode_pairs(&body[3..]),
            })
        }
        sysex::SHIFT_DATA => Ok(SysexMessage::ShiftData(decode_pairs(body))),
        other => Ok(SysexMessage::Unknown {
            id: other,
            payload: body.to_vec(),
        }),
    }
}

/// Parses a capability-response body into one entry per pin.
///
/// Each pin is a list of `(mode, resolution)` byte pairs closed by
/// [`NO_CHANNEL`]. Modes outside [`PinMode`] are skipped. A trailing group
/// without its terminator is ignored.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if a pin's group holds an odd
/// number of bytes.
pub fn parse_capabilities(body: &[u8]) -> Result<Vec<PinCapabilities>, ProtocolError> {
    let mut pins = Vec::new();
    let mut current = PinCapabilities::default();
    let mut pending: Option<u8> = None;

    for &byte in body {
        match (pending, byte) {
            (None, NO_CHANNEL) => {
                pins.push(std::mem::take(&mut current));
            }
            (None, mode) => pending = Some(mode),
            (Some(mode), resolution) => {
                pending = None;
                match PinMode::try_from(mode) {
                    Ok(mode) => current.modes.push(ModeCapability { mode, resolution }),
                    Err(_) => {
                        tracing::trace!("skipping unsupported mode 0x{mode:02X} for pin {}", pins.len())
                    }
                }
            }
        }
    }

    if pending.is_some() {
        return Err(ProtocolError::MalformedPayload(format!(
            "capability entry for pin {} has a mode without a resolution",
            pins.len()
        )));
    }
    Ok(pins)
}

fn require_len(buf: &[u8], needed: usize, context: &'static str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::InsufficientData {
            context,
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Renders bytes as `0x.. 0x..` for log lines.
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("0x{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
