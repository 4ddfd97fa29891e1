//! Errors returned by [`crate::FirmataClient`].

use std::time::Duration;

use firmata_core::{PinError, PinMode, ProtocolError};
use thiserror::Error;

/// Every error a caller of the client can observe.
#[derive(Debug, Error)]
pub enum FirmataError {
    /// The pin index is outside the board's registry.
    #[error("invalid pin {pin}: board has {count} pin(s)")]
    InvalidPin { pin: usize, count: usize },

    /// The pin does not support the requested mode.
    #[error("pin {pin} does not support {mode} mode")]
    UnsupportedMode { pin: usize, mode: PinMode },

    /// The pin has no analog channel, so analog reporting is impossible.
    #[error("pin {pin} has no analog channel")]
    NoAnalogChannel { pin: usize },

    /// An argument cannot be represented on the wire.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Reading from or writing to the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The board sent a frame that could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The handshake did not reach ready before the deadline.
    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    /// `connect` was called while a connection is open or handshaking.
    #[error("a connection is already open")]
    ConnectionAlreadyOpen,

    /// No connection is open.
    #[error("not connected")]
    NotConnected,

    /// The connection closed while an operation was waiting on it.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// A request/reply round trip received no reply in time.
    #[error("{request} received no reply within {timeout:?}")]
    RequestTimeout {
        request: &'static str,
        timeout: Duration,
    },
}

impl From<PinError> for FirmataError {
    fn from(err: PinError) -> Self {
        match err {
            PinError::InvalidPin { pin, count } => FirmataError::InvalidPin { pin, count },
            PinError::UnsupportedMode { pin, mode } => FirmataError::UnsupportedMode { pin, mode },
            PinError::NoAnalogChannel { pin } => FirmataError::NoAnalogChannel { pin },
        }
    }
}
