//! Streaming frame decoder.
//!
//! A transport hands the reader arbitrary chunks of bytes; frames can be split
//! across chunks or cut off by noise. [`FrameDecoder`] keeps the partial frame
//! between calls and turns every completed frame into a [`Message`].
//!
//! Resynchronisation rule: any byte with bit 7 set that arrives while a frame
//! is incomplete aborts that frame (reported as
//! [`ProtocolError::InterruptedFrame`]) and is then processed as the start of
//! a new frame. The single exception is the SPI vendor id `0x80`, which is
//! accepted as the first byte of a sysex payload.

use tracing::trace;

use crate::protocol::codec::{classify, decode_sysex, from_7bit, ProtocolError};
use crate::protocol::messages::{sysex, CommandKind, Message, END_SYSEX, START_SYSEX};

#[derive(Debug)]
enum State {
    Idle,
    Fixed {
        command: u8,
        kind: CommandKind,
        data: [u8; 2],
        len: usize,
    },
    Sysex {
        payload: Vec<u8>,
    },
}

/// Incremental decoder for inbound Firmata traffic.
///
/// # Examples
///
/// ```rust
/// use firmata_core::protocol::decoder::FrameDecoder;
/// use firmata_core::protocol::messages::Message;
///
/// let mut decoder = FrameDecoder::new();
/// assert!(decoder.decode(&[0xF9, 0x02]).is_empty());
/// let out = decoder.decode(&[0x05]);
/// assert_eq!(out, vec![Ok(Message::ProtocolVersion { major: 2, minor: 5 })]);
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    stray: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            stray: 0,
        }
    }

    /// Drops any partially received frame.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.stray = 0;
    }

    /// Returns `true` while a frame is partially received.
    pub fn in_frame(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// Feeds `bytes` into the decoder and returns every frame they complete,
    /// in wire order. Errors are returned inline so a caller can report them
    /// and keep going.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<Result<Message, ProtocolError>> {
        let mut out = Vec::new();
        for &byte in bytes {
            self.push(byte, &mut out);
        }
        out
    }

    /// Signals end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PrematureEof`] if the stream ended inside a
    /// frame.
    pub fn finish(&mut self) -> Result<(), ProtocolError> {
        let pending = match &self.state {
            State::Idle => return Ok(()),
            State::Fixed { len, .. } => 1 + len,
            State::Sysex { payload } => 1 + payload.len(),
        };
        self.reset();
        Err(ProtocolError::PrematureEof(pending))
    }

    fn push(&mut self, byte: u8, out: &mut Vec<Result<Message, ProtocolError>>) {
        if byte & 0x80 == 0 {
            self.push_data(byte, out);
            return;
        }

        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => {}
            State::Fixed { command, .. } => {
                out.push(Err(ProtocolError::InterruptedFrame {
                    command,
                    interrupted_by: byte,
                }));
            }
            State::Sysex { mut payload } => {
                if byte == END_SYSEX {
                    out.push(decode_sysex(&payload).map(Message::Sysex));
                    return;
                }
                if byte == sysex::SPI && payload.is_empty() {
                    payload.push(byte);
                    self.state = State::Sysex { payload };
                    return;
                }
                out.push(Err(ProtocolError::InterruptedFrame {
                    command: START_SYSEX,
                    interrupted_by: byte,
                }));
            }
        }

        self.start(byte, out);
    }

    fn push_data(&mut self, byte: u8, out: &mut Vec<Result<Message, ProtocolError>>) {
        match &mut self.state {
            State::Idle => {
                self.stray += 1;
            }
            State::Sysex { payload } => payload.push(byte),
            State::Fixed {
                kind, data, len, ..
            } => {
                data[*len] = byte;
                *len += 1;
                if *len == 2 {
                    let message = fixed_message(*kind, *data);
                    self.state = State::Idle;
                    if let Some(message) = message {
                        out.push(Ok(message));
                    }
                }
            }
        }
    }

    fn start(&mut self, byte: u8, out: &mut Vec<Result<Message, ProtocolError>>) {
        if self.stray > 0 {
            trace!("skipped {} stray data byte(s)", self.stray);
            self.stray = 0;
        }

        let Some(kind) = classify(byte) else {
            return;
        };
        self.state = match kind {
            CommandKind::DigitalMessage { .. }
            | CommandKind::AnalogMessage { .. }
            | CommandKind::ProtocolVersion => State::Fixed {
                command: byte,
                kind,
                data: [0; 2],
                len: 0,
            },
            CommandKind::StartSysex => State::Sysex {
                payload: Vec::new(),
            },
            // Host-to-board commands and bytes the board never sends.
            CommandKind::EndSysex
            | CommandKind::SystemReset
            | CommandKind::SetPinMode
            | CommandKind::ReportAnalog { .. }
            | CommandKind::ReportDigital { .. }
            | CommandKind::Unknown(_) => {
                out.push(Err(ProtocolError::UnexpectedCommand(byte)));
                State::Idle
            }
        };
    }
}

fn fixed_message(kind: CommandKind, data: [u8; 2]) -> Option<Message> {
    match kind {
        CommandKind::DigitalMessage { port } => Some(Message::DigitalPortUpdate {
            port,
            bits: from_7bit(data[0], data[1]) as u8,
        }),
        CommandKind::AnalogMessage { channel } => Some(Message::AnalogChannelUpdate {
            channel,
            value: from_7bit(data[0], data[1]),
        }),
        CommandKind::ProtocolVersion => Some(Message::ProtocolVersion {
            major: data[0],
            minor: data[1],
        }),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
