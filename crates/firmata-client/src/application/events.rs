//! Events published by the reader task.

use firmata_core::protocol::messages::{I2cReply, SerialPort};
use firmata_core::PinMode;

/// Something the board reported, or a change in the connection.
///
/// Events go through a bounded broadcast buffer. A subscriber that falls
/// behind loses the oldest events and is told how many it missed; the reader
/// itself never waits for subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardEvent {
    /// An analog channel reported a new sample.
    AnalogValue { pin: usize, channel: u8, value: u16 },
    /// A digital port reported its state. `pins` lists the input pins whose
    /// recorded value was updated.
    DigitalPort { port: u8, value: u8, pins: Vec<usize> },
    /// Reply to a pin-state query.
    PinState {
        pin: usize,
        mode: Option<PinMode>,
        state: u32,
    },
    /// A string sent by the firmware.
    StringData(String),
    /// Bytes received on a serial port.
    SerialData { port: SerialPort, data: Vec<u8> },
    /// An I2C reply no round trip was waiting for, such as continuous reads.
    I2cReply(I2cReply),
    /// An SPI reply no round trip was waiting for.
    SpiReply { chip_select: u8, data: Vec<u8> },
    /// Shift-in data.
    ShiftData(Vec<u8>),
    /// A frame could not be decoded after the handshake completed.
    ProtocolFault(String),
    /// The connection closed.
    Disconnected { reason: String },
}
