//! Hardware and software serial ports behind the `0x60` sysex.
//!
//! Received serial bytes are published as [`crate::BoardEvent::SerialData`].

use firmata_core::protocol::messages::SerialPort;
use firmata_core::Command;

use crate::application::board::FirmataClient;
use crate::error::FirmataError;

/// Receive buffer requested from the firmware by [`FirmataClient::serial_config`].
pub const DEFAULT_BUFFER_SIZE: u32 = 1024;

/// Largest value three 7-bit groups can carry.
const MAX_U21: u32 = (1 << 21) - 1;

impl FirmataClient {
    /// Opens `port` at `baud` with a newline-terminated receive buffer.
    pub async fn serial_config(&self, port: SerialPort, baud: u32) -> Result<(), FirmataError> {
        if baud == 0 || baud > MAX_U21 {
            return Err(FirmataError::InvalidArgument(format!("baud rate {baud} out of range")));
        }
        self.shared
            .send(&Command::SerialConfig {
                port,
                baud,
                buffer_size: DEFAULT_BUFFER_SIZE,
                terminator: b'\n',
            })
            .await
    }

    pub async fn serial_write(&self, port: SerialPort, data: &[u8]) -> Result<(), FirmataError> {
        self.shared
            .send(&Command::SerialWrite {
                port,
                data: data.to_vec(),
            })
            .await
    }

    pub async fn serial_flush(&self, port: SerialPort) -> Result<(), FirmataError> {
        self.shared.send(&Command::SerialFlush { port }).await
    }

    pub async fn serial_close(&self, port: SerialPort) -> Result<(), FirmataError> {
        self.shared.send(&Command::SerialClose { port }).await
    }
}
