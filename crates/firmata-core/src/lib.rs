//! # firmata-core
//!
//! Shared library for the Firmata host containing the wire codec, the
//! streaming frame decoder, the pin registry and the connection handshake
//! state machine.
//!
//! It has no dependencies on sockets, serial ports or an async runtime; the
//! `firmata-client` crate puts it to work over a real transport.
//!
//! # Architecture overview (for beginners)
//!
//! Firmata lets a host computer drive the pins of a microcontroller over a
//! byte stream. The host sends small commands ("make pin 13 an output",
//! "set port 1 to 0b0010_0000") and the board streams back pin values and
//! replies to queries.
//!
//! - **`protocol`** – How bytes travel over the wire. Every payload byte has
//!   bit 7 clear, so values are split into 7-bit groups. Longer messages are
//!   wrapped in *sysex* frames (`0xF0 id … 0xF7`).
//!
//! - **`domain`** – The board model. After a reset the host asks the board
//!   which modes every pin supports and which pins are analog inputs. The
//!   answers fill the `PinRegistry`; the `Handshake` state machine decides
//!   which question to ask next.

pub mod domain;
pub mod protocol;

pub use domain::handshake::{ConnectionState, Handshake, HandshakeConfig, HandshakeStep, TimeoutAction};
pub use domain::pins::{ModeSet, Pin, PinError, PinMode};
pub use domain::registry::PinRegistry;
pub use protocol::codec::{encode_command, ProtocolError};
pub use protocol::decoder::FrameDecoder;
pub use protocol::messages::{Command, FirmwareInfo, I2cReply, Message, SysexMessage};
