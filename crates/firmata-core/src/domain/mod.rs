//! Domain entities for the Firmata host.
//!
//! This module contains the board model and connection logic with no I/O
//! dependencies.
//!
//! # Why keep the handshake here? (for beginners)
//!
//! The handshake is usually written as a loop that reads from a serial port
//! and sleeps between retries. Here it is instead a plain state machine: it
//! is told which message arrived and what time it is, and answers with the
//! command to send next. The tokio engine in `firmata-client` drives it, and
//! the unit tests below drive it with made-up instants, so every transition
//! can be tested without a board or a clock.

/// Pin modes, supported-mode sets and per-pin state.
pub mod pins;

/// The pin table built during the handshake.
///
/// See [`registry::PinRegistry`] for the main type.
pub mod registry;

/// Connection handshake state machine.
pub mod handshake;
