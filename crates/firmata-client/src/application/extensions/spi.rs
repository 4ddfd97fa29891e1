//! SPI transfers under the `0x80` vendor sysex id.

use firmata_core::protocol::messages::SpiMode;
use firmata_core::Command;

use crate::application::board::{lock, FirmataClient};
use crate::application::extensions::round_trip;
use crate::error::FirmataError;

impl FirmataClient {
    /// Configures the SPI bus for the device selected by `chip_select`.
    pub async fn spi_config(&self, chip_select: usize, mode: SpiMode) -> Result<(), FirmataError> {
        let chip_select = self.chip_select(chip_select)?;
        self.shared
            .send(&Command::SpiConfig { chip_select, mode })
            .await
    }

    /// Clocks `data` out to the device at `chip_select` and returns the bytes
    /// clocked in.
    ///
    /// # Errors
    ///
    /// [`FirmataError::RequestTimeout`] if no reply for this chip select
    /// arrives within the configured request timeout.
    pub async fn spi_transfer(&self, chip_select: usize, data: &[u8]) -> Result<Vec<u8>, FirmataError> {
        let chip_select = self.chip_select(chip_select)?;
        let command = Command::SpiTransfer {
            chip_select,
            data: data.to_vec(),
        };
        round_trip(
            &self.shared,
            &self.shared.spi,
            chip_select,
            command,
            self.shared.config.request_timeout(),
        )
        .await
    }

    /// Chip select is an ordinary digital pin; it only has to exist and fit
    /// the one-byte reply key.
    fn chip_select(&self, pin: usize) -> Result<u8, FirmataError> {
        lock(&self.shared.registry).validate(pin)?;
        u8::try_from(pin).map_err(|_| {
            FirmataError::InvalidArgument(format!("chip select pin {pin} exceeds one byte"))
        })
    }
}
