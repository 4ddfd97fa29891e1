//! Command writer: the pin-level write API of [`FirmataClient`].
//!
//! Every method validates against the pin registry before anything is
//! written, so an invalid pin or unsupported mode never reaches the board.
//! Validation, the registry mirror update and the write all happen under the
//! writer lock: two concurrent `digital_write`s on the same port cannot
//! transmit their port bytes out of order.

use firmata_core::protocol::messages::PINS_PER_PORT;
use firmata_core::{Command, PinMode};
use tracing::debug;

use crate::application::board::{lock, write_command, FirmataClient};
use crate::error::FirmataError;

/// Largest pin a plain analog message can address.
const MAX_ANALOG_MESSAGE_PIN: usize = 15;
/// Largest pin number a single 7-bit data byte can carry.
const MAX_WIRE_PIN: usize = 0x7F;
/// Largest channel the report-analog command byte can carry.
const MAX_REPORT_CHANNEL: u8 = 0x0F;
/// Largest value a 14-bit field can carry.
const MAX_U14: u32 = 0x3FFF;

/// Converts a pin index to its one-byte wire form.
pub(crate) fn wire_pin(pin: usize) -> Result<u8, FirmataError> {
    if pin > MAX_WIRE_PIN {
        return Err(FirmataError::InvalidArgument(format!(
            "pin {pin} cannot be addressed in a 7-bit field"
        )));
    }
    Ok(pin as u8)
}

impl FirmataClient {
    /// Sends `SYSTEM_RESET`.
    pub async fn reset(&self) -> Result<(), FirmataError> {
        self.shared.send(&Command::SystemReset).await
    }

    /// Sets the mode of `pin`.
    ///
    /// # Errors
    ///
    /// [`FirmataError::InvalidPin`] or [`FirmataError::UnsupportedMode`],
    /// without sending anything.
    pub async fn set_pin_mode(&self, pin: usize, mode: PinMode) -> Result<(), FirmataError> {
        let mut guard = self.shared.writer.lock().await;
        let writer = guard.as_mut().ok_or(FirmataError::NotConnected)?;
        lock(&self.shared.registry).require_mode(pin, mode)?;
        let wire = wire_pin(pin)?;

        write_command(writer, &Command::SetPinMode { pin: wire, mode }).await?;
        lock(&self.shared.registry).set_mode(pin, mode)?;
        Ok(())
    }

    /// Drives a digital output pin high or low.
    ///
    /// The whole port is transmitted: the other seven bits come from the
    /// registry's port state. The registry records the bit only once the
    /// write went out.
    pub async fn digital_write(&self, pin: usize, high: bool) -> Result<(), FirmataError> {
        let mut guard = self.shared.writer.lock().await;
        let writer = guard.as_mut().ok_or(FirmataError::NotConnected)?;
        let bits = {
            let registry = lock(&self.shared.registry);
            registry.require_mode(pin, PinMode::Output)?;
            registry.port_with_bit(pin, high)?
        };
        wire_pin(pin)?;
        let port = (pin / PINS_PER_PORT) as u8;
        write_command(writer, &Command::DigitalMessage { port, bits }).await?;
        lock(&self.shared.registry).set_digital_bit(pin, high)?;
        Ok(())
    }

    /// Writes a PWM duty cycle or servo position.
    ///
    /// Pins above 15 and values wider than 14 bits are sent with the
    /// extended analog sysex.
    pub async fn analog_write(&self, pin: usize, value: u32) -> Result<(), FirmataError> {
        let mut guard = self.shared.writer.lock().await;
        let writer = guard.as_mut().ok_or(FirmataError::NotConnected)?;
        lock(&self.shared.registry).require_any_mode(pin, &[PinMode::Pwm, PinMode::Servo])?;
        let wire = wire_pin(pin)?;

        let command = if pin <= MAX_ANALOG_MESSAGE_PIN && value <= MAX_U14 {
            Command::AnalogMessage {
                pin: wire,
                value: value as u16,
            }
        } else {
            Command::ExtendedAnalog { pin: wire, value }
        };
        write_command(writer, &command).await?;
        lock(&self.shared.registry).set_value(pin, value)?;
        Ok(())
    }

    /// Enables or disables reporting for the port that contains `pin`.
    pub async fn report_digital(&self, pin: usize, enabled: bool) -> Result<(), FirmataError> {
        lock(&self.shared.registry).validate(pin)?;
        wire_pin(pin)?;
        let port = (pin / PINS_PER_PORT) as u8;
        self.shared
            .send(&Command::ReportDigital { port, enabled })
            .await
    }

    /// Enables or disables reporting for the analog channel of `pin`.
    ///
    /// # Errors
    ///
    /// [`FirmataError::NoAnalogChannel`] if the analog mapping gave `pin` no
    /// channel.
    pub async fn report_analog(&self, pin: usize, enabled: bool) -> Result<(), FirmataError> {
        let channel = {
            let registry = lock(&self.shared.registry);
            registry.validate(pin)?;
            registry
                .channel_for_pin(pin)
                .ok_or(FirmataError::NoAnalogChannel { pin })?
        };
        if channel > MAX_REPORT_CHANNEL {
            return Err(FirmataError::InvalidArgument(format!(
                "analog channel {channel} of pin {pin} cannot be reported"
            )));
        }
        self.shared
            .send(&Command::ReportAnalog { channel, enabled })
            .await
    }

    pub async fn query_capabilities(&self) -> Result<(), FirmataError> {
        self.shared.send(&Command::CapabilityQuery).await
    }

    pub async fn query_analog_mapping(&self) -> Result<(), FirmataError> {
        self.shared.send(&Command::AnalogMappingQuery).await
    }

    pub async fn query_firmware(&self) -> Result<(), FirmataError> {
        self.shared.send(&Command::FirmwareQuery).await
    }

    pub async fn query_protocol_version(&self) -> Result<(), FirmataError> {
        self.shared.send(&Command::ProtocolVersionQuery).await
    }

    /// Asks the board for the mode and state of `pin`. The answer arrives as
    /// [`crate::BoardEvent::PinState`].
    pub async fn query_pin_state(&self, pin: usize) -> Result<(), FirmataError> {
        lock(&self.shared.registry).validate(pin)?;
        let pin = wire_pin(pin)?;
        self.shared.send(&Command::PinStateQuery { pin }).await
    }

    /// Sets how often the board samples analog inputs and continuous I2C
    /// reads.
    pub async fn set_sampling_interval(&self, millis: u16) -> Result<(), FirmataError> {
        if u32::from(millis) > MAX_U14 {
            return Err(FirmataError::InvalidArgument(format!(
                "sampling interval {millis}ms exceeds 14 bits"
            )));
        }
        self.shared.send(&Command::SamplingInterval { millis }).await
    }

    /// Configures the pulse range of a servo pin, in microseconds.
    pub async fn servo_config(
        &self,
        pin: usize,
        min_pulse: u16,
        max_pulse: u16,
    ) -> Result<(), FirmataError> {
        lock(&self.shared.registry).require_mode(pin, PinMode::Servo)?;
        let pin = wire_pin(pin)?;
        if u32::from(min_pulse.max(max_pulse)) > MAX_U14 || min_pulse > max_pulse {
            return Err(FirmataError::InvalidArgument(format!(
                "servo pulse range {min_pulse}..{max_pulse} is invalid"
            )));
        }
        self.shared
            .send(&Command::ServoConfig {
                pin,
                min_pulse,
                max_pulse,
            })
            .await
    }

    pub async fn send_string(&self, text: &str) -> Result<(), FirmataError> {
        self.shared.send(&Command::StringData(text.to_string())).await
    }

    // ── Pin-level convenience ────────────────────────────────────────────────

    /// Sets the mode of `pin` and, for input modes, enables reporting so the
    /// registry starts receiving values.
    pub async fn pin_mode(&self, pin: usize, mode: PinMode) -> Result<(), FirmataError> {
        self.set_pin_mode(pin, mode).await?;
        match mode {
            PinMode::Input => self.report_digital(pin, true).await,
            PinMode::Analog => self.report_analog(pin, true).await,
            _ => Ok(()),
        }?;
        debug!("pin {pin} is now {mode}");
        Ok(())
    }

    /// Switches `pin` to `mode` through [`FirmataClient::pin_mode`] unless
    /// the registry already records that mode.
    async fn ensure_mode(&self, pin: usize, mode: PinMode) -> Result<(), FirmataError> {
        let current = lock(&self.shared.registry).validate(pin)?.mode;
        if current != mode {
            self.pin_mode(pin, mode).await?;
        }
        Ok(())
    }

    /// Drives `pin` high or low, switching it to output first if needed.
    pub async fn write_pin(&self, pin: usize, high: bool) -> Result<(), FirmataError> {
        self.ensure_mode(pin, PinMode::Output).await?;
        self.digital_write(pin, high).await
    }

    /// Last value the board reported for a digital pin.
    ///
    /// A pin not yet in input mode is switched to it and its port reporting
    /// enabled, so the first call returns the recorded value and later calls
    /// follow the board.
    pub async fn digital_read(&self, pin: usize) -> Result<bool, FirmataError> {
        self.ensure_mode(pin, PinMode::Input).await?;
        Ok(lock(&self.shared.registry).validate(pin)?.value != 0)
    }

    /// Last sample the board reported for an analog pin, switching the pin to
    /// analog mode with reporting first if needed.
    pub async fn analog_read(&self, pin: usize) -> Result<u32, FirmataError> {
        self.ensure_mode(pin, PinMode::Analog).await?;
        Ok(lock(&self.shared.registry).validate(pin)?.value)
    }
}
