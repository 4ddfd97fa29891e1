//! Application layer of the client.
//!
//! # What lives here?
//!
//! - **`board`** – [`board::FirmataClient`], the connection lifecycle
//!   (`connect`, `disconnect`) and the state shared with the reader task.
//!
//! - **`reader`** – The task that decodes everything the board sends and
//!   routes it to the registry, the handshake, the extension reply slots or
//!   the event stream.
//!
//! - **`commands`** – The validated write API (`set_pin_mode`,
//!   `digital_write`, `analog_write`, reporting toggles, queries).
//!
//! - **`extensions`** – I2C, SPI and serial on top of sysex.
//!
//! - **`transport`** – The [`transport::Transport`] trait any open byte
//!   stream satisfies.

pub mod board;
pub mod commands;
pub mod events;
pub mod extensions;
pub(crate) mod reader;
pub mod transport;
