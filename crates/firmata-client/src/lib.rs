//! firmata-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does firmata-client do? (for beginners)
//!
//! `firmata-core` knows how Firmata bytes look; this crate moves them. Given
//! any open byte stream to a board (a TCP socket, a serial port adapter, or
//! an in-memory pipe in tests), [`FirmataClient`]:
//!
//! 1. Resets the board and walks it through the handshake (protocol version,
//!    firmware name, pin capabilities, analog mapping).
//! 2. Spawns a reader task that decodes everything the board sends, keeps
//!    the pin registry current and publishes [`BoardEvent`]s.
//! 3. Offers writer methods (`set_pin_mode`, `digital_write`,
//!    `analog_write`, I2C/SPI/serial...) that validate against the registry
//!    before any byte goes out.

/// Application layer: the client engine, writer API and extensions.
pub mod application;

/// Client configuration schema.
pub mod config;

/// Caller-facing error type.
pub mod error;

/// Infrastructure layer: TCP transport and config file loading.
pub mod infrastructure;

pub use application::board::FirmataClient;
pub use application::events::BoardEvent;
pub use application::transport::Transport;
pub use config::ClientConfig;
pub use error::FirmataError;
