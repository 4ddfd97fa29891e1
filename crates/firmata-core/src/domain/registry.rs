//! Pin registry: the host-side mirror of the board's pins.
//!
//! The registry is rebuilt from scratch on every handshake. Pin indices are
//! assigned in the order pins appear in the capability response, and the
//! analog mapping then assigns channels to a subset of them. The mapping is a
//! partial bijection: every channel resolves to exactly one pin, and pins
//! without a channel are never found by a channel lookup.
//!
//! Digital pins are grouped into ports of eight. The registry keeps one
//! state byte per port so a `digital_write` can transmit the whole port
//! without asking the board for the other seven bits.

use std::collections::HashMap;

use tracing::debug;

use crate::domain::pins::{ModeSet, Pin, PinError, PinMode};
use crate::protocol::codec::{parse_capabilities, ProtocolError};
use crate::protocol::messages::{PinCapabilities, NO_CHANNEL, PINS_PER_PORT};

/// Ordered table of [`Pin`]s plus the channel index and port bitmap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinRegistry {
    pins: Vec<Pin>,
    channels: HashMap<u8, usize>,
    ports: Vec<u8>,
}

impl PinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pins reported by the board.
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    pub fn pin(&self, index: usize) -> Option<&Pin> {
        self.pins.get(index)
    }

    /// Forgets every pin. Used when a connection closes.
    pub fn clear(&mut self) {
        self.pins.clear();
        self.channels.clear();
        self.ports.clear();
    }

    // ── Handshake updates ────────────────────────────────────────────────────

    /// Parses a raw capability-response body and rebuilds the registry.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if the body cannot be
    /// parsed; the registry is left untouched in that case.
    pub fn apply_capability_response(&mut self, body: &[u8]) -> Result<(), ProtocolError> {
        let capabilities = parse_capabilities(body)?;
        self.rebuild(&capabilities);
        Ok(())
    }

    /// Replaces every pin with one built from `capabilities` and drops the
    /// previous analog mapping.
    pub fn rebuild(&mut self, capabilities: &[PinCapabilities]) {
        self.pins = capabilities
            .iter()
            .map(|caps| {
                let mut pin = Pin {
                    supported: caps.modes.iter().map(|c| c.mode).collect::<ModeSet>(),
                    ..Pin::default()
                };
                for cap in &caps.modes {
                    pin.resolutions[cap.mode as usize] = cap.resolution;
                }
                pin
            })
            .collect();
        self.channels.clear();
        self.ports = vec![0; self.pins.len().div_ceil(PINS_PER_PORT)];
        debug!("registry rebuilt with {} pin(s)", self.pins.len());
    }

    /// Applies an analog-mapping response: one byte per pin in registry
    /// order, [`NO_CHANNEL`] meaning the pin has no analog channel. Extra
    /// trailing bytes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ShortAnalogMapping`] if `mapping` is shorter
    /// than the pin count, or [`ProtocolError::DuplicateChannel`] if two pins
    /// claim the same channel. On error the previous mapping is kept.
    pub fn apply_analog_mapping_response(&mut self, mapping: &[u8]) -> Result<(), ProtocolError> {
        if mapping.len() < self.pins.len() {
            return Err(ProtocolError::ShortAnalogMapping {
                expected: self.pins.len(),
                got: mapping.len(),
            });
        }

        let mut channels = HashMap::new();
        for (pin, &channel) in mapping.iter().take(self.pins.len()).enumerate() {
            if channel == NO_CHANNEL {
                continue;
            }
            if let Some(first) = channels.insert(channel, pin) {
                return Err(ProtocolError::DuplicateChannel {
                    channel,
                    first,
                    second: pin,
                });
            }
        }

        for pin in &mut self.pins {
            pin.analog_channel = None;
        }
        for (&channel, &pin) in &channels {
            self.pins[pin].analog_channel = Some(channel);
        }
        debug!("analog mapping assigned {} channel(s)", channels.len());
        self.channels = channels;
        Ok(())
    }

    pub fn pin_for_channel(&self, channel: u8) -> Option<usize> {
        self.channels.get(&channel).copied()
    }

    pub fn channel_for_pin(&self, pin: usize) -> Option<u8> {
        self.pins.get(pin).and_then(|p| p.analog_channel)
    }

    // ── Validation ───────────────────────────────────────────────────────────

    /// Returns the pin at `pin` or [`PinError::InvalidPin`].
    pub fn validate(&self, pin: usize) -> Result<&Pin, PinError> {
        self.pins.get(pin).ok_or(PinError::InvalidPin {
            pin,
            count: self.pins.len(),
        })
    }

    /// Validates `pin` and checks that it supports `mode`.
    pub fn require_mode(&self, pin: usize, mode: PinMode) -> Result<&Pin, PinError> {
        let entry = self.validate(pin)?;
        if entry.supports(mode) {
            Ok(entry)
        } else {
            Err(PinError::UnsupportedMode { pin, mode })
        }
    }

    /// Validates `pin` and checks that it supports at least one of `modes`.
    pub fn require_any_mode(&self, pin: usize, modes: &[PinMode]) -> Result<&Pin, PinError> {
        let entry = self.validate(pin)?;
        match modes.iter().find(|m| entry.supports(**m)) {
            Some(_) => Ok(entry),
            None => Err(PinError::UnsupportedMode {
                pin,
                mode: modes.first().copied().unwrap_or(PinMode::Output),
            }),
        }
    }

    // ── Writer mirror ────────────────────────────────────────────────────────

    /// Records `mode` for `pin`.
    ///
    /// # Errors
    ///
    /// [`PinError::InvalidPin`] or [`PinError::UnsupportedMode`]; nothing
    /// changes on error.
    pub fn set_mode(&mut self, pin: usize, mode: PinMode) -> Result<(), PinError> {
        self.require_mode(pin, mode)?;
        self.pins[pin].mode = mode;
        Ok(())
    }

    /// Returns the port byte `pin` would produce if driven `high`, without
    /// recording it.
    pub fn port_with_bit(&self, pin: usize, high: bool) -> Result<u8, PinError> {
        self.validate(pin)?;
        let (port, bit) = (pin / PINS_PER_PORT, pin % PINS_PER_PORT);
        let byte = self.ports[port];
        Ok(if high { byte | 1 << bit } else { byte & !(1 << bit) })
    }

    /// Sets or clears the bit for `pin` in its port byte and returns the
    /// resulting byte for transmission.
    pub fn set_digital_bit(&mut self, pin: usize, high: bool) -> Result<u8, PinError> {
        let byte = self.port_with_bit(pin, high)?;
        self.ports[pin / PINS_PER_PORT] = byte;
        self.pins[pin].value = u32::from(high);
        Ok(byte)
    }

    /// Records a value sent by `analog_write`.
    pub fn set_value(&mut self, pin: usize, value: u32) -> Result<(), PinError> {
        self.validate(pin)?;
        self.pins[pin].value = value;
        Ok(())
    }

    pub fn port_state(&self, port: usize) -> Option<u8> {
        self.ports.get(port).copied()
    }

    // ── Reader updates ───────────────────────────────────────────────────────

    /// Applies an inbound digital message. Only pins currently in
    /// [`PinMode::Input`] take the reported value. Returns the indices of the
    /// pins that were updated.
    pub fn apply_digital_port(&mut self, port: u8, bits: u8) -> Vec<usize> {
        let port = usize::from(port);
        let mut updated = Vec::new();
        for bit in 0..PINS_PER_PORT {
            let index = port * PINS_PER_PORT + bit;
            let Some(pin) = self.pins.get_mut(index) else {
                break;
            };
            if pin.mode != PinMode::Input {
                continue;
            }
            let high = bits & (1 << bit) != 0;
            pin.value = u32::from(high);
            if let Some(byte) = self.ports.get_mut(port) {
                if high {
                    *byte |= 1 << bit;
                } else {
                    *byte &= !(1 << bit);
                }
            }
            updated.push(index);
        }
        updated
    }

    /// Applies an inbound analog message to the pin mapped to `channel`.
    /// Returns the pin index, or `None` if the channel is not mapped.
    pub fn apply_analog_channel(&mut self, channel: u8, value: u16) -> Option<usize> {
        let pin = self.pin_for_channel(channel)?;
        self.pins[pin].value = u32::from(value);
        Some(pin)
    }

    /// Applies a pin-state response. An unknown mode number leaves the
    /// recorded mode as it was.
    pub fn apply_pin_state(&mut self, pin: usize, mode: u8, state: u32) -> Result<(), PinError> {
        self.validate(pin)?;
        let entry = &mut self.pins[pin];
        if let Ok(mode) = PinMode::try_from(mode) {
            entry.mode = mode;
        }
        entry.state = state;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Pins 0-1: input/output. Pin 2: input/output/analog(10). Pin 3:
    /// output/pwm(8). Pins 4-9: input/output.
    fn sample_capabilities() -> Vec<u8> {
        let mut body = Vec::new();
        for pin in 0..10 {
            body.extend_from_slice(&[0x00, 0x01, 0x01, 0x01]);
            match pin {
                2 => body.extend_from_slice(&[0x02, 0x0A]),
                3 => body.extend_from_slice(&[0x03, 0x08]),
                _ => {}
            }
            body.push(0x7F);
        }
        body
    }

    fn sample_registry() -> PinRegistry {
        let mut registry = PinRegistry::new();
        registry
            .apply_capability_response(&sample_capabilities())
            .unwrap();
        let mut mapping = vec![0x7F; 10];
        mapping[2] = 0;
        registry.apply_analog_mapping_response(&mapping).unwrap();
        registry
    }

    #[test]
    fn test_capability_response_builds_pins_in_arrival_order() {
        let registry = sample_registry();
        assert_eq!(registry.len(), 10);
        assert!(registry.pins()[2].supports(PinMode::Analog));
        assert_eq!(registry.pins()[2].resolution(PinMode::Analog), Some(10));
        assert!(registry.pins()[3].supports(PinMode::Pwm));
        assert!(!registry.pins()[0].supports(PinMode::Analog));
    }

    #[test]
    fn test_capability_response_is_idempotent() {
        let mut first = PinRegistry::new();
        first.apply_capability_response(&sample_capabilities()).unwrap();
        let mut second = first.clone();
        second.apply_capability_response(&sample_capabilities()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_capability_response_clears_analog_mapping() {
        let mut registry = sample_registry();
        assert_eq!(registry.pin_for_channel(0), Some(2));
        registry
            .apply_capability_response(&sample_capabilities())
            .unwrap();
        assert_eq!(registry.pin_for_channel(0), None);
        assert_eq!(registry.channel_for_pin(2), None);
    }

    #[test]
    fn test_analog_mapping_is_a_bijection() {
        let registry = sample_registry();
        assert_eq!(registry.channel_for_pin(2), Some(0));
        assert_eq!(registry.pin_for_channel(0), Some(2));
        assert_eq!(registry.channel_for_pin(0), None);
    }

    #[test]
    fn test_short_analog_mapping_is_rejected() {
        let mut registry = PinRegistry::new();
        registry
            .apply_capability_response(&sample_capabilities())
            .unwrap();
        let err = registry.apply_analog_mapping_response(&[0x7F; 9]).unwrap_err();
        assert_eq!(err, ProtocolError::ShortAnalogMapping { expected: 10, got: 9 });
    }

    #[test]
    fn test_duplicate_channel_is_rejected_and_previous_mapping_kept() {
        let mut registry = sample_registry();
        let mut mapping = vec![0x7F; 10];
        mapping[2] = 1;
        mapping[5] = 1;
        let err = registry.apply_analog_mapping_response(&mapping).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::DuplicateChannel {
                channel: 1,
                first: 2,
                second: 5,
            }
        );
        assert_eq!(registry.pin_for_channel(0), Some(2));
    }

    #[test]
    fn test_set_mode_rejects_unsupported_mode() {
        let mut registry = sample_registry();
        assert_eq!(
            registry.set_mode(0, PinMode::Analog),
            Err(PinError::UnsupportedMode {
                pin: 0,
                mode: PinMode::Analog,
            })
        );
        assert_eq!(registry.pins()[0].mode, PinMode::Output);
    }

    #[test]
    fn test_set_mode_rejects_out_of_range_pin() {
        let mut registry = sample_registry();
        assert_eq!(
            registry.set_mode(10, PinMode::Input),
            Err(PinError::InvalidPin { pin: 10, count: 10 })
        );
    }

    #[test]
    fn test_set_digital_bit_combines_pins_in_same_port() {
        let mut registry = sample_registry();
        assert_eq!(registry.set_digital_bit(9, true).unwrap(), 0b0000_0010);
        assert_eq!(registry.set_digital_bit(8, true).unwrap(), 0b0000_0011);
        assert_eq!(registry.set_digital_bit(9, false).unwrap(), 0b0000_0001);
        assert_eq!(registry.port_state(0), Some(0));
    }

    #[test]
    fn test_port_with_bit_does_not_record() {
        let mut registry = sample_registry();
        registry.set_digital_bit(8, true).unwrap();

        assert_eq!(registry.port_with_bit(9, true).unwrap(), 0b0000_0011);
        assert_eq!(registry.port_state(1), Some(0b0000_0001));
        assert_eq!(registry.pins()[9].value, 0);
    }

    #[test]
    fn test_inbound_digital_port_only_updates_input_pins() {
        let mut registry = sample_registry();
        registry.set_mode(1, PinMode::Input).unwrap();
        let updated = registry.apply_digital_port(0, 0xFF);
        assert_eq!(updated, vec![1]);
        assert_eq!(registry.pins()[1].value, 1);
        assert_eq!(registry.pins()[0].value, 0);
    }

    #[test]
    fn test_inbound_analog_updates_mapped_pin_regardless_of_mode() {
        let mut registry = sample_registry();
        assert_eq!(registry.pins()[2].mode, PinMode::Output);
        assert_eq!(registry.apply_analog_channel(0, 512), Some(2));
        assert_eq!(registry.pins()[2].value, 512);
        assert_eq!(registry.apply_analog_channel(5, 1), None);
    }

    #[test]
    fn test_pin_state_updates_mode_and_state() {
        let mut registry = sample_registry();
        registry.apply_pin_state(3, 0x03, 200).unwrap();
        assert_eq!(registry.pins()[3].mode, PinMode::Pwm);
        assert_eq!(registry.pins()[3].state, 200);
    }
}
