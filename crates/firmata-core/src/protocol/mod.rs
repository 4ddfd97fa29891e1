//! Protocol module containing message types, the wire codec and the
//! streaming frame decoder.

pub mod codec;
pub mod decoder;
pub mod messages;

pub use codec::{decode_sysex, encode_command, ProtocolError};
pub use decoder::FrameDecoder;
pub use messages::*;
