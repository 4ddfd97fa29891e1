//! The client engine: connection lifecycle and shared state.
//!
//! # Concurrency model
//!
//! ```text
//!  caller tasks ──► FirmataClient methods ──► writer slot (tokio Mutex) ──► transport write half
//!                           │                        ▲
//!                           ▼                        │ handshake queries
//!                    PinRegistry (std Mutex) ◄── reader task ◄── transport read half
//!                                                     │
//!                                                     ├──► broadcast::Sender<BoardEvent>
//!                                                     └──► I2C / SPI reply slots
//! ```
//!
//! Lock order is writer slot, then session, then registry. The std mutexes
//! are never held across an `.await`.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Instant;

use firmata_core::protocol::codec::{encode_command, hex};
use firmata_core::{
    Command, ConnectionState, FirmwareInfo, Handshake, I2cReply, Pin, PinRegistry, TimeoutAction,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::events::BoardEvent;
use crate::application::extensions::ReplySlot;
use crate::application::reader;
use crate::application::transport::{split, BoxedWriter, Transport};
use crate::config::ClientConfig;
use crate::error::FirmataError;

/// Locks a std mutex, recovering the guard if a previous holder panicked.
/// Every critical section is a single in-memory update, so the data is
/// still consistent.
pub(crate) fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handshake progress and board identity for the current connection.
pub(crate) struct Session {
    pub handshake: Handshake,
    pub protocol_version: Option<(u8, u8)>,
    pub firmware: Option<FirmwareInfo>,
    /// Completes `connect` once the reader sees ready, or fails it when the
    /// reader stops first.
    pub ready_tx: Option<oneshot::Sender<Result<(), FirmataError>>>,
}

/// State shared between the caller-facing client and the reader task.
pub(crate) struct Shared {
    pub config: ClientConfig,
    pub registry: StdMutex<PinRegistry>,
    pub session: StdMutex<Session>,
    pub writer: Mutex<Option<BoxedWriter>>,
    pub events: broadcast::Sender<BoardEvent>,
    pub i2c: ReplySlot<u16, I2cReply>,
    pub spi: ReplySlot<u8, Vec<u8>>,
}

impl Shared {
    /// Encodes and writes one command under the writer lock.
    pub async fn send(&self, command: &Command) -> Result<(), FirmataError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(FirmataError::NotConnected)?;
        write_command(writer, command).await
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn publish(&self, event: BoardEvent) {
        let _ = self.events.send(event);
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.session).handshake.state()
    }

    /// Fails every waiting round trip.
    pub fn cancel_requests(&self) {
        self.i2c.cancel();
        self.spi.cancel();
    }
}

/// Writes one encoded command to `writer` and flushes it.
pub(crate) async fn write_command(
    writer: &mut BoxedWriter,
    command: &Command,
) -> Result<(), FirmataError> {
    let bytes = encode_command(command);
    debug!("tx {}: {}", command.name(), hex(&bytes));
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Host-side handle to one Firmata board.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct FirmataClient {
    pub(crate) shared: Arc<Shared>,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl FirmataClient {
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(config.events.capacity.max(1));
        let handshake = Handshake::new(config.handshake_config());
        Self {
            shared: Arc::new(Shared {
                config,
                registry: StdMutex::new(PinRegistry::new()),
                session: StdMutex::new(Session {
                    handshake,
                    protocol_version: None,
                    firmware: None,
                    ready_tx: None,
                }),
                writer: Mutex::new(None),
                events,
                i2c: ReplySlot::default(),
                spi: ReplySlot::default(),
            }),
            reader: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Subscribes to board events. Each subscriber has its own buffer of
    /// `events.capacity` entries; when it overflows, the oldest are dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Protocol version reported during the handshake.
    pub fn protocol_version(&self) -> Option<(u8, u8)> {
        lock(&self.shared.session).protocol_version
    }

    /// Firmware name and version reported during the handshake.
    pub fn firmware(&self) -> Option<FirmwareInfo> {
        lock(&self.shared.session).firmware.clone()
    }

    /// Snapshot of every pin.
    pub fn pins(&self) -> Vec<Pin> {
        lock(&self.shared.registry).pins().to_vec()
    }

    /// Takes ownership of an open `transport`, runs the handshake and
    /// returns once the board is ready.
    ///
    /// # Errors
    ///
    /// - [`FirmataError::ConnectionAlreadyOpen`] if a connection is open.
    /// - [`FirmataError::HandshakeTimeout`] if the deadline passes; the
    ///   transport is closed and the state is [`ConnectionState::Failed`].
    /// - [`FirmataError::Transport`] or [`FirmataError::ConnectionClosed`] if
    ///   the transport fails during the handshake.
    pub async fn connect<T: Transport>(&self, transport: T) -> Result<(), FirmataError> {
        let (read_half, write_half) = split(transport);

        let (reset, mut ready_rx) = {
            let mut writer = self.shared.writer.lock().await;
            let mut session = lock(&self.shared.session);
            let state = session.handshake.state();
            let idle = matches!(state, ConnectionState::NotConnected | ConnectionState::Failed);
            if writer.is_some() || !idle {
                return Err(FirmataError::ConnectionAlreadyOpen);
            }
            *writer = Some(write_half);
            lock(&self.shared.registry).clear();

            let (ready_tx, ready_rx) = oneshot::channel();
            session.handshake = Handshake::new(self.shared.config.handshake_config());
            session.protocol_version = None;
            session.firmware = None;
            session.ready_tx = Some(ready_tx);
            let reset = session.handshake.start(Instant::now());
            (reset, ready_rx)
        };

        let handle = tokio::spawn(reader::run(Arc::clone(&self.shared), read_half));
        if let Some(previous) = lock(&self.reader).replace(handle) {
            previous.abort();
        }
        info!("connecting: sending reset");

        if let Err(err) = self.shared.send(&reset).await {
            self.teardown(ConnectionState::Failed).await;
            return Err(err);
        }

        loop {
            let action = lock(&self.shared.session)
                .handshake
                .poll_timeout(Instant::now());
            match action {
                TimeoutAction::Wait(at) => {
                    tokio::select! {
                        outcome = &mut ready_rx => return self.finish_connect(outcome).await,
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => {}
                    }
                }
                TimeoutAction::RetryReset => {
                    if let Err(err) = self.shared.send(&Command::SystemReset).await {
                        self.teardown(ConnectionState::Failed).await;
                        return Err(err);
                    }
                }
                TimeoutAction::Fail => {
                    let deadline = self.shared.config.handshake_config().deadline;
                    self.teardown(ConnectionState::Failed).await;
                    return Err(FirmataError::HandshakeTimeout(deadline));
                }
                TimeoutAction::Idle => return self.finish_connect((&mut ready_rx).await).await,
            }
        }
    }

    async fn finish_connect(
        &self,
        outcome: Result<Result<(), FirmataError>, oneshot::error::RecvError>,
    ) -> Result<(), FirmataError> {
        let result = outcome.unwrap_or_else(|_| {
            Err(FirmataError::ConnectionClosed(
                "reader stopped during handshake".to_string(),
            ))
        });
        match result {
            Ok(()) => {
                let pins = lock(&self.shared.registry).len();
                let firmware = self.firmware().map(|f| f.name).unwrap_or_default();
                info!("board ready: {firmware} with {pins} pin(s)");
                Ok(())
            }
            Err(err) => {
                warn!("handshake failed: {err}");
                self.teardown(ConnectionState::Failed).await;
                Err(err)
            }
        }
    }

    /// Closes the transport and stops the reader.
    ///
    /// Calling this with no open connection is a no-op.
    pub async fn disconnect(&self) -> Result<(), FirmataError> {
        let was_open = self.shared.writer.lock().await.is_some();
        self.teardown(ConnectionState::NotConnected).await;
        if was_open {
            info!("disconnected");
            self.shared.publish(BoardEvent::Disconnected {
                reason: "closed by host".to_string(),
            });
        }
        Ok(())
    }

    /// Releases the transport and resets shared state, leaving the session
    /// in `final_state`.
    async fn teardown(&self, final_state: ConnectionState) {
        let writer = self.shared.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("transport shutdown: {e}");
            }
        }
        if let Some(handle) = lock(&self.reader).take() {
            handle.abort();
        }
        {
            let mut session = lock(&self.shared.session);
            session.ready_tx = None;
            match final_state {
                ConnectionState::Failed => session.handshake.fail(),
                _ => session.handshake.close(),
            }
        }
        lock(&self.shared.registry).clear();
        self.shared.cancel_requests();
    }
}

impl Drop for FirmataClient {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.reader).take() {
            handle.abort();
        }
    }
}
