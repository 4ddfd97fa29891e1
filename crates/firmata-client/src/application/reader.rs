//! The reader task.
//!
//! Runs for the lifetime of a connection: read a chunk, decode every frame it
//! completes, apply each frame to the registry / handshake / reply slots, then
//! send whatever queries the handshake asked for. Closing the transport is
//! the only way to stop it besides aborting the task.

use std::sync::Arc;
use std::time::Instant;

use firmata_core::protocol::codec::hex;
use firmata_core::{
    Command, ConnectionState, FrameDecoder, HandshakeStep, Message, PinMode, ProtocolError,
    SysexMessage,
};
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, trace, warn};

use crate::application::board::{lock, Session, Shared};
use crate::application::events::BoardEvent;
use crate::application::transport::BoxedReader;
use crate::error::FirmataError;

const READ_CHUNK: usize = 1024;

pub(crate) async fn run(shared: Arc<Shared>, mut reader: BoxedReader) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK];

    let closed = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => {
                debug!("rx {}", hex(&buf[..n]));
                let mut outgoing = Vec::new();
                let now = Instant::now();
                for frame in decoder.decode(&buf[..n]) {
                    dispatch(&shared, frame, now, &mut outgoing);
                }
                for command in outgoing {
                    if let Err(e) = shared.send(&command).await {
                        warn!("could not send {}: {e}", command.name());
                    }
                }
            }
            Err(e) => break Some(e),
        }
    };

    if let Err(e) = decoder.finish() {
        warn!("{e}");
    }
    on_closed(&shared, closed).await;
}

/// Applies one decoded frame. Commands the handshake wants sent are pushed
/// to `outgoing`.
fn dispatch(
    shared: &Shared,
    frame: Result<Message, ProtocolError>,
    now: Instant,
    outgoing: &mut Vec<Command>,
) {
    let mut session = lock(&shared.session);
    let state = session.handshake.state();

    let message = match frame {
        Ok(message) => message,
        Err(err) => {
            protocol_fault(shared, &mut session, err, now, outgoing);
            return;
        }
    };

    if !session.handshake.accepts(&message) {
        trace!("discarding {message:?} before protocol version");
        return;
    }

    match &message {
        Message::ProtocolVersion { major, minor } => {
            info!("protocol version {major}.{minor}");
            session.protocol_version = Some((*major, *minor));
        }
        Message::DigitalPortUpdate { port, bits } => {
            let pins = lock(&shared.registry).apply_digital_port(*port, *bits);
            shared.publish(BoardEvent::DigitalPort {
                port: *port,
                value: *bits,
                pins,
            });
        }
        Message::AnalogChannelUpdate { channel, value } => {
            match lock(&shared.registry).apply_analog_channel(*channel, *value) {
                Some(pin) => shared.publish(BoardEvent::AnalogValue {
                    pin,
                    channel: *channel,
                    value: *value,
                }),
                None => debug!("analog channel {channel} is not mapped to a pin"),
            }
        }
        Message::Sysex(sysex) => {
            debug!("rx sysex {}", sysex.name());
            if let Err(err) = apply_sysex(shared, &mut session, sysex, outgoing) {
                protocol_fault(shared, &mut session, err, now, outgoing);
                return;
            }
        }
    }

    match session.handshake.observe(&message, now) {
        HandshakeStep::Ignore => {}
        HandshakeStep::Send(command) => outgoing.push(command),
        HandshakeStep::Ready => {
            if let Some(tx) = session.ready_tx.take() {
                let _ = tx.send(Ok(()));
            }
        }
    }

    if state != session.handshake.state() {
        trace!("state {} -> {}", state, session.handshake.state());
    }
}

fn apply_sysex(
    shared: &Shared,
    session: &mut Session,
    sysex: &SysexMessage,
    outgoing: &mut Vec<Command>,
) -> Result<(), ProtocolError> {
    match sysex {
        SysexMessage::FirmwareResponse(info) => {
            info!("firmware {} {}.{}", info.name, info.major, info.minor);
            session.firmware = Some(info.clone());
        }
        SysexMessage::CapabilityResponse(capabilities) => {
            lock(&shared.registry).rebuild(capabilities);
            info!("board reports {} pin(s)", capabilities.len());
            // A capability response drops the analog mapping, so outside the
            // handshake it has to be fetched again.
            if session.handshake.state() == ConnectionState::Ready {
                outgoing.push(Command::AnalogMappingQuery);
            }
        }
        SysexMessage::AnalogMappingResponse(mapping) => {
            lock(&shared.registry).apply_analog_mapping_response(mapping)?;
        }
        SysexMessage::PinStateResponse { pin, mode, state } => {
            let pin = usize::from(*pin);
            match lock(&shared.registry).apply_pin_state(pin, *mode, *state) {
                Ok(()) => shared.publish(BoardEvent::PinState {
                    pin,
                    mode: PinMode::try_from(*mode).ok(),
                    state: *state,
                }),
                Err(e) => debug!("ignoring pin state: {e}"),
            }
        }
        SysexMessage::I2cReply(reply) => {
            if let Err(reply) = shared.i2c.deliver(reply.address, reply.clone()) {
                shared.publish(BoardEvent::I2cReply(reply));
            }
        }
        SysexMessage::SpiReply { chip_select, data } => {
            if let Err(data) = shared.spi.deliver(*chip_select, data.clone()) {
                shared.publish(BoardEvent::SpiReply {
                    chip_select: *chip_select,
                    data,
                });
            }
        }
        SysexMessage::SerialReply { port, data } => shared.publish(BoardEvent::SerialData {
            port: *port,
            data: data.clone(),
        }),
        SysexMessage::StringData(text) => {
            info!("board says: {text}");
            shared.publish(BoardEvent::StringData(text.clone()));
        }
        SysexMessage::ShiftData(data) => shared.publish(BoardEvent::ShiftData(data.clone())),
        SysexMessage::Unknown { id, payload } => {
            debug!("unhandled sysex 0x{id:02X} ({} byte(s))", payload.len());
        }
    }
    Ok(())
}

/// Before ready a fault restarts the handshake with a reset; after ready it
/// is published and decoding carries on at the next frame.
fn protocol_fault(
    shared: &Shared,
    session: &mut Session,
    err: ProtocolError,
    now: Instant,
    outgoing: &mut Vec<Command>,
) {
    match session.handshake.state() {
        ConnectionState::NotConnected | ConnectionState::AwaitingProtocolVersion => {
            trace!("discarding before protocol version: {err}");
        }
        ConnectionState::Ready => {
            warn!("protocol fault: {err}");
            shared.publish(BoardEvent::ProtocolFault(err.to_string()));
        }
        ConnectionState::Failed => {}
        _ => match session.handshake.protocol_fault(now) {
            Some(reset) => {
                warn!("protocol fault during handshake, resetting: {err}");
                outgoing.push(reset);
            }
            None => warn!("protocol fault during handshake, awaiting protocol version: {err}"),
        },
    }
}

/// The read loop ended: `error` is `None` for a clean end of stream.
async fn on_closed(shared: &Shared, error: Option<std::io::Error>) {
    let reason = match &error {
        None => "transport closed by peer".to_string(),
        Some(e) => e.to_string(),
    };
    match &error {
        None => info!("{reason}"),
        Some(_) => error!("transport read failed: {reason}"),
    }

    let was_ready = {
        let mut session = lock(&shared.session);
        let was_ready = session.handshake.state() == ConnectionState::Ready;
        if let Some(tx) = session.ready_tx.take() {
            let err = match error {
                None => FirmataError::ConnectionClosed(reason.clone()),
                Some(e) => FirmataError::Transport(e),
            };
            let _ = tx.send(Err(err));
        }
        if was_ready {
            session.handshake.close();
        } else {
            session.handshake.fail();
        }
        was_ready
    };

    if was_ready {
        shared.writer.lock().await.take();
        lock(&shared.registry).clear();
    }
    shared.cancel_requests();
    shared.publish(BoardEvent::Disconnected { reason });
}
