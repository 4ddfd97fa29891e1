//! Pin modes and per-pin state.

use std::fmt;

use thiserror::Error;

/// A pin mode as numbered on the wire by `SET_PIN_MODE` and capability
/// responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PinMode {
    Input = 0x00,
    Output = 0x01,
    Analog = 0x02,
    Pwm = 0x03,
    Servo = 0x04,
    Shift = 0x05,
    I2c = 0x06,
    Spi = 0x07,
}

impl PinMode {
    /// Every mode in wire order.
    pub const ALL: [PinMode; 8] = [
        PinMode::Input,
        PinMode::Output,
        PinMode::Analog,
        PinMode::Pwm,
        PinMode::Servo,
        PinMode::Shift,
        PinMode::I2c,
        PinMode::Spi,
    ];

    /// Modes whose value the board reports back on its own once reporting is
    /// enabled.
    pub fn is_input(self) -> bool {
        matches!(self, PinMode::Input | PinMode::Analog)
    }
}

impl TryFrom<u8> for PinMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PinMode::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(value)
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PinMode::Input => "input",
            PinMode::Output => "output",
            PinMode::Analog => "analog",
            PinMode::Pwm => "pwm",
            PinMode::Servo => "servo",
            PinMode::Shift => "shift",
            PinMode::I2c => "i2c",
            PinMode::Spi => "spi",
        };
        f.write_str(name)
    }
}

/// Set of [`PinMode`]s stored as a bitset (bit `n` = mode `n`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModeSet(u8);

impl ModeSet {
    pub const EMPTY: ModeSet = ModeSet(0);

    pub fn insert(&mut self, mode: PinMode) {
        self.0 |= 1 << mode as u8;
    }

    pub fn contains(self, mode: PinMode) -> bool {
        self.0 & (1 << mode as u8) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates the modes in wire order.
    pub fn iter(self) -> impl Iterator<Item = PinMode> {
        PinMode::ALL.into_iter().filter(move |m| self.contains(*m))
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl FromIterator<PinMode> for ModeSet {
    fn from_iter<I: IntoIterator<Item = PinMode>>(iter: I) -> Self {
        let mut set = ModeSet::EMPTY;
        for mode in iter {
            set.insert(mode);
        }
        set
    }
}

/// Errors raised when a pin operation is validated against the registry.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PinError {
    /// The pin index is outside the registry.
    #[error("invalid pin {pin}: board has {count} pin(s)")]
    InvalidPin { pin: usize, count: usize },

    /// The pin does not list `mode` in its capabilities.
    #[error("pin {pin} does not support {mode} mode")]
    UnsupportedMode { pin: usize, mode: PinMode },

    /// The pin has no analog channel assigned by the analog mapping.
    #[error("pin {pin} has no analog channel")]
    NoAnalogChannel { pin: usize },
}

/// One addressable pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    /// Modes listed for this pin in the capability response.
    pub supported: ModeSet,
    /// Resolution in bits for each supported mode, indexed by mode number.
    pub resolutions: [u8; 8],
    /// Current mode, mirrored locally from the last `SET_PIN_MODE` or pin
    /// state response.
    pub mode: PinMode,
    /// Last known value. Digital pins hold 0/1, analog pins the raw sample.
    pub value: u32,
    /// Raw state from the last pin-state response.
    pub state: u32,
    /// Analog channel assigned by the analog mapping, if any.
    pub analog_channel: Option<u8>,
}

impl Default for Pin {
    fn default() -> Self {
        Self {
            supported: ModeSet::EMPTY,
            resolutions: [0; 8],
            mode: PinMode::Output,
            value: 0,
            state: 0,
            analog_channel: None,
        }
    }
}

impl Pin {
    pub fn supports(&self, mode: PinMode) -> bool {
        self.supported.contains(mode)
    }

    /// Resolution in bits for `mode`, or `None` if unsupported.
    pub fn resolution(&self, mode: PinMode) -> Option<u8> {
        self.supports(mode)
            .then(|| self.resolutions[mode as usize])
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_mode_try_from_covers_wire_values() {
        for (value, mode) in PinMode::ALL.iter().enumerate() {
            assert_eq!(PinMode::try_from(value as u8), Ok(*mode));
        }
        assert_eq!(PinMode::try_from(0x0B), Err(0x0B));
    }

    #[test]
    fn test_mode_set_membership() {
        let set: ModeSet = [PinMode::Input, PinMode::Output].into_iter().collect();
        assert!(set.contains(PinMode::Input));
        assert!(set.contains(PinMode::Output));
        assert!(!set.contains(PinMode::Analog));
        assert_eq!(set.len(), 2);
        assert_eq!(set.bits(), 0b11);
    }

    #[test]
    fn test_mode_set_iterates_in_wire_order() {
        let set: ModeSet = [PinMode::Spi, PinMode::Input, PinMode::Pwm].into_iter().collect();
        let modes: Vec<_> = set.iter().collect();
        assert_eq!(modes, vec![PinMode::Input, PinMode::Pwm, PinMode::Spi]);
    }

    #[test]
    fn test_default_pin_is_output_with_no_channel() {
        let pin = Pin::default();
        assert_eq!(pin.mode, PinMode::Output);
        assert_eq!(pin.analog_channel, None);
        assert!(pin.supported.is_empty());
    }

    #[test]
    fn test_resolution_only_for_supported_modes() {
        let mut pin = Pin::default();
        pin.supported.insert(PinMode::Analog);
        pin.resolutions[PinMode::Analog as usize] = 10;
        assert_eq!(pin.resolution(PinMode::Analog), Some(10));
        assert_eq!(pin.resolution(PinMode::Pwm), None);
    }
}
