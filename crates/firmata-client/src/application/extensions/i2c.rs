//! I2C master operations.
//!
//! ```text
//! request  0xF0 0x76 addr_lsb7 (addr_msb3 | mode << 3) [reg pair] [data pairs | count pair] 0xF7
//! reply    0xF0 0x77 addr pair reg pair data pairs... 0xF7
//! ```

use firmata_core::protocol::messages::I2cMode;
use firmata_core::{Command, I2cReply};

use crate::application::board::FirmataClient;
use crate::application::extensions::round_trip;
use crate::error::FirmataError;

/// Largest 10-bit I2C address.
const MAX_ADDRESS: u16 = 0x3FF;
/// Largest value a 14-bit field can carry.
const MAX_U14: u16 = 0x3FFF;

fn check_address(address: u16) -> Result<(), FirmataError> {
    if address > MAX_ADDRESS {
        return Err(FirmataError::InvalidArgument(format!(
            "I2C address 0x{address:X} exceeds 10 bits"
        )));
    }
    Ok(())
}

fn check_u14(what: &str, value: u16) -> Result<(), FirmataError> {
    if value > MAX_U14 {
        return Err(FirmataError::InvalidArgument(format!("{what} {value} exceeds 14 bits")));
    }
    Ok(())
}

impl FirmataClient {
    /// Enables I2C on the board. `delay_us` is the pause between writing a
    /// register and reading it back, needed by some devices.
    pub async fn i2c_config(&self, delay_us: u16) -> Result<(), FirmataError> {
        check_u14("I2C delay", delay_us)?;
        self.shared.send(&Command::I2cConfig { delay_us }).await
    }

    /// Writes `data` to the device at `address`.
    pub async fn i2c_write(&self, address: u16, data: &[u8]) -> Result<(), FirmataError> {
        check_address(address)?;
        self.shared
            .send(&Command::I2cWrite {
                address,
                data: data.to_vec(),
            })
            .await
    }

    /// Reads `count` bytes from `address`, optionally starting at `register`,
    /// and waits for the reply.
    ///
    /// # Errors
    ///
    /// [`FirmataError::RequestTimeout`] if the board does not answer within
    /// the configured request timeout.
    pub async fn i2c_read(
        &self,
        address: u16,
        register: Option<u16>,
        count: u16,
    ) -> Result<I2cReply, FirmataError> {
        check_address(address)?;
        check_u14("I2C read count", count)?;
        if let Some(register) = register {
            check_u14("I2C register", register)?;
        }
        let command = Command::I2cRead {
            address,
            register,
            count,
            mode: I2cMode::Read,
        };
        round_trip(
            &self.shared,
            &self.shared.i2c,
            address,
            command,
            self.shared.config.request_timeout(),
        )
        .await
    }

    /// Starts a continuous read. Replies arrive as
    /// [`crate::BoardEvent::I2cReply`] until [`FirmataClient::i2c_stop_reading`].
    pub async fn i2c_read_continuous(
        &self,
        address: u16,
        register: Option<u16>,
        count: u16,
    ) -> Result<(), FirmataError> {
        check_address(address)?;
        check_u14("I2C read count", count)?;
        if let Some(register) = register {
            check_u14("I2C register", register)?;
        }
        self.shared
            .send(&Command::I2cRead {
                address,
                register,
                count,
                mode: I2cMode::ContinuousRead,
            })
            .await
    }

    pub async fn i2c_stop_reading(&self, address: u16) -> Result<(), FirmataError> {
        check_address(address)?;
        self.shared.send(&Command::I2cStopReading { address }).await
    }
}
