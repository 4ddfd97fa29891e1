//! All Firmata message types: command bytes, sysex sub-commands, decoded
//! inbound [`Message`]s and outbound [`Command`]s.
//!
//! The constants follow the Firmata protocol v2.x command table. Every byte
//! on the wire is either a *command byte* (bit 7 set) or a *data byte*
//! (bit 7 clear), which is what lets a receiver resynchronise after noise.

use crate::domain::pins::PinMode;

// ── Command bytes ─────────────────────────────────────────────────────────────

/// Digital I/O message, low nibble carries the port number.
pub const DIGITAL_MESSAGE: u8 = 0x90;
/// Analog I/O message, low nibble carries the analog channel.
pub const ANALOG_MESSAGE: u8 = 0xE0;
/// Enable/disable analog reporting, low nibble carries the analog channel.
pub const REPORT_ANALOG: u8 = 0xC0;
/// Enable/disable digital reporting, low nibble carries the port number.
pub const REPORT_DIGITAL: u8 = 0xD0;
/// Start of a sysex frame.
pub const START_SYSEX: u8 = 0xF0;
/// Set pin mode: `0xF4 pin mode`.
pub const SET_PIN_MODE: u8 = 0xF4;
/// End of a sysex frame.
pub const END_SYSEX: u8 = 0xF7;
/// Protocol version report/query: `0xF9 major minor`.
pub const PROTOCOL_VERSION: u8 = 0xF9;
/// System reset.
pub const SYSTEM_RESET: u8 = 0xFF;

/// Wire value used as a field separator in capability responses and as the
/// "no analog channel" marker in analog-mapping responses.
pub const NO_CHANNEL: u8 = 0x7F;

/// Number of digital pins grouped into one port.
pub const PINS_PER_PORT: usize = 8;

// ── Sysex sub-commands ────────────────────────────────────────────────────────

/// Sysex sub-command identifiers (first payload byte of a sysex frame).
pub mod sysex {
    pub const SERIAL: u8 = 0x60;
    pub const ANALOG_MAPPING_QUERY: u8 = 0x69;
    pub const ANALOG_MAPPING_RESPONSE: u8 = 0x6A;
    pub const CAPABILITY_QUERY: u8 = 0x6B;
    pub const CAPABILITY_RESPONSE: u8 = 0x6C;
    pub const PIN_STATE_QUERY: u8 = 0x6D;
    pub const PIN_STATE_RESPONSE: u8 = 0x6E;
    pub const EXTENDED_ANALOG: u8 = 0x6F;
    pub const SERVO_CONFIG: u8 = 0x70;
    pub const STRING_DATA: u8 = 0x71;
    pub const SHIFT_DATA: u8 = 0x75;
    pub const I2C_REQUEST: u8 = 0x76;
    pub const I2C_REPLY: u8 = 0x77;
    pub const I2C_CONFIG: u8 = 0x78;
    /// Firmware query and firmware response share the same id.
    pub const REPORT_FIRMWARE: u8 = 0x79;
    pub const SAMPLING_INTERVAL: u8 = 0x7A;
    pub const NON_REALTIME: u8 = 0x7E;
    pub const REALTIME: u8 = 0x7F;
    /// Vendor id used by the SPI sub-protocol.
    pub const SPI: u8 = 0x80;
}

/// Sub-ids of the serial sub-protocol. The low nibble carries the port.
pub mod serial {
    pub const CONFIG: u8 = 0x10;
    pub const COMM: u8 = 0x20;
    pub const FLUSH: u8 = 0x30;
    pub const CLOSE: u8 = 0x40;
}

/// Sub-ids of the SPI sub-protocol.
pub mod spi {
    pub const CONFIG: u8 = 0x10;
    pub const COMM: u8 = 0x20;
}

// ── Command classification ────────────────────────────────────────────────────

/// What a command byte announces, and therefore how many bytes follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// `0x90..=0x9F`: two data bytes follow.
    DigitalMessage { port: u8 },
    /// `0xE0..=0xEF`: two data bytes follow.
    AnalogMessage { channel: u8 },
    /// `0xF9`: two data bytes follow.
    ProtocolVersion,
    /// `0xF0`: data bytes follow until `0xF7`.
    StartSysex,
    /// `0xF7` outside a sysex frame.
    EndSysex,
    /// `0xFF`: no data.
    SystemReset,
    /// `0xF4`: outbound only; two data bytes follow.
    SetPinMode,
    /// `0xC0..=0xCF`: outbound only; one data byte follows.
    ReportAnalog { channel: u8 },
    /// `0xD0..=0xDF`: outbound only; one data byte follows.
    ReportDigital { port: u8 },
    /// Any other byte with bit 7 set.
    Unknown(u8),
}

impl CommandKind {
    /// Number of data bytes that follow this command byte, or `None` for
    /// variable-length frames (sysex).
    pub fn data_len(self) -> Option<usize> {
        match self {
            CommandKind::DigitalMessage { .. }
            | CommandKind::AnalogMessage { .. }
            | CommandKind::ProtocolVersion
            | CommandKind::SetPinMode => Some(2),
            CommandKind::ReportAnalog { .. } | CommandKind::ReportDigital { .. } => Some(1),
            CommandKind::SystemReset | CommandKind::EndSysex | CommandKind::Unknown(_) => Some(0),
            CommandKind::StartSysex => None,
        }
    }
}

// ── Inbound messages ──────────────────────────────────────────────────────────

/// A fully decoded frame received from the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `0xF9 major minor`.
    ProtocolVersion { major: u8, minor: u8 },
    /// `0x90|port lsb msb`: state of the 8 pins of `port`.
    DigitalPortUpdate { port: u8, bits: u8 },
    /// `0xE0|channel lsb msb`: 14-bit sample of an analog channel.
    AnalogChannelUpdate { channel: u8, value: u16 },
    /// `0xF0 id payload 0xF7`.
    Sysex(SysexMessage),
}

/// One supported mode of a pin together with its resolution in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeCapability {
    pub mode: PinMode,
    pub resolution: u8,
}

/// Capabilities of a single pin as listed in a capability response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinCapabilities {
    pub modes: Vec<ModeCapability>,
}

/// Decoded firmware report (`0x79`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub major: u8,
    pub minor: u8,
    /// Firmware file name with NUL bytes removed.
    pub name: String,
}

/// Decoded I2C reply (`0x77`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cReply {
    pub address: u16,
    pub register: u16,
    pub data: Vec<u8>,
}

/// Serial port identifiers used by the serial sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SerialPort {
    Soft = 0x00,
    Hard1 = 0x01,
    Hard2 = 0x02,
    Hard3 = 0x03,
}

impl TryFrom<u8> for SerialPort {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(SerialPort::Soft),
            0x01 => Ok(SerialPort::Hard1),
            0x02 => Ok(SerialPort::Hard2),
            0x03 => Ok(SerialPort::Hard3),
            _ => Err(()),
        }
    }
}

/// SPI clock polarity/phase mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SpiMode {
    Mode0 = 0x00,
    Mode1 = 0x04,
    Mode2 = 0x08,
    Mode3 = 0x0C,
}

/// I2C read/write mode carried in bits 3-4 of the second request byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum I2cMode {
    Write = 0x00,
    Read = 0x01,
    ContinuousRead = 0x02,
    StopReading = 0x03,
}

/// Sysex payloads the engine understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SysexMessage {
    CapabilityResponse(Vec<PinCapabilities>),
    /// One byte per pin in registry order; [`NO_CHANNEL`] means no channel.
    AnalogMappingResponse(Vec<u8>),
    PinStateResponse { pin: u8, mode: u8, state: u32 },
    FirmwareResponse(FirmwareInfo),
    I2cReply(I2cReply),
    StringData(String),
    SerialReply { port: SerialPort, data: Vec<u8> },
    SpiReply { chip_select: u8, data: Vec<u8> },
    ShiftData(Vec<u8>),
    /// A well-formed frame with an id this engine does not interpret.
    Unknown { id: u8, payload: Vec<u8> },
}

impl SysexMessage {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            SysexMessage::CapabilityResponse(_) => "CapabilityResponse",
            SysexMessage::AnalogMappingResponse(_) => "AnalogMappingResponse",
            SysexMessage::PinStateResponse { .. } => "PinStateResponse",
            SysexMessage::FirmwareResponse(_) => "FirmwareResponse",
            SysexMessage::I2cReply(_) => "I2cReply",
            SysexMessage::StringData(_) => "StringData",
            SysexMessage::SerialReply { .. } => "SerialReply",
            SysexMessage::SpiReply { .. } => "SpiReply",
            SysexMessage::ShiftData(_) => "ShiftData",
            SysexMessage::Unknown { .. } => "Unknown",
        }
    }
}

// ── Outbound commands ─────────────────────────────────────────────────────────

/// A command the host sends to the board. Encoded by
/// [`crate::protocol::codec::encode_command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SystemReset,
    ProtocolVersionQuery,
    SetPinMode { pin: u8, mode: PinMode },
    /// Full 8-bit state of one port.
    DigitalMessage { port: u8, bits: u8 },
    /// 14-bit value for pins 0..=15.
    AnalogMessage { pin: u8, value: u16 },
    /// Arbitrary-width value for any pin, sent as 7-bit groups.
    ExtendedAnalog { pin: u8, value: u32 },
    ReportAnalog { channel: u8, enabled: bool },
    ReportDigital { port: u8, enabled: bool },
    FirmwareQuery,
    CapabilityQuery,
    AnalogMappingQuery,
    PinStateQuery { pin: u8 },
    SamplingInterval { millis: u16 },
    ServoConfig { pin: u8, min_pulse: u16, max_pulse: u16 },
    StringData(String),
    I2cConfig { delay_us: u16 },
    I2cWrite { address: u16, data: Vec<u8> },
    /// One-shot (`Read`) or repeating (`ContinuousRead`) read of `count` bytes.
    I2cRead { address: u16, register: Option<u16>, count: u16, mode: I2cMode },
    I2cStopReading { address: u16 },
    SerialConfig { port: SerialPort, baud: u32, buffer_size: u32, terminator: u8 },
    SerialWrite { port: SerialPort, data: Vec<u8> },
    SerialFlush { port: SerialPort },
    SerialClose { port: SerialPort },
    SpiConfig { chip_select: u8, mode: SpiMode },
    SpiTransfer { chip_select: u8, data: Vec<u8> },
}

impl Command {
    /// Short name used in log lines and timeout errors.
    pub fn name(&self) -> &'static str {
        match self {
            Command::SystemReset => "SystemReset",
            Command::ProtocolVersionQuery => "ProtocolVersionQuery",
            Command::SetPinMode { .. } => "SetPinMode",
            Command::DigitalMessage { .. } => "DigitalMessage",
            Command::AnalogMessage { .. } => "AnalogMessage",
            Command::ExtendedAnalog { .. } => "ExtendedAnalog",
            Command::ReportAnalog { .. } => "ReportAnalog",
            Command::ReportDigital { .. } => "ReportDigital",
            Command::FirmwareQuery => "FirmwareQuery",
            Command::CapabilityQuery => "CapabilityQuery",
            Command::AnalogMappingQuery => "AnalogMappingQuery",
            Command::PinStateQuery { .. } => "PinStateQuery",
            Command::SamplingInterval { .. } => "SamplingInterval",
            Command::ServoConfig { .. } => "ServoConfig",
            Command::StringData(_) => "StringData",
            Command::I2cConfig { .. } => "I2cConfig",
            Command::I2cWrite { .. } => "I2cWrite",
            Command::I2cRead { .. } => "I2cRead",
            Command::I2cStopReading { .. } => "I2cStopReading",
            Command::SerialConfig { .. } => "SerialConfig",
            Command::SerialWrite { .. } => "SerialWrite",
            Command::SerialFlush { .. } => "SerialFlush",
            Command::SerialClose { .. } => "SerialClose",
            Command::SpiConfig { .. } => "SpiConfig",
            Command::SpiTransfer { .. } => "SpiTransfer",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
