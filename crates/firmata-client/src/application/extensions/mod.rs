//! Sysex extension protocols: I2C, SPI and serial.
//!
//! I2C reads and SPI transfers are request/reply round trips. Each extension
//! owns one [`ReplySlot`]: a request lock that admits a single outstanding
//! request, and a one-shot reply channel tagged with the correlation key the
//! wire reply carries (I2C address, SPI chip select). The reader only
//! delivers a reply whose key matches; anything else is published as a
//! [`crate::BoardEvent`] instead.
//!
//! Serial has no round trip. Inbound serial bytes are always events.

pub mod i2c;
pub mod serial;
pub mod spi;

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use firmata_core::Command;
use tokio::sync::{oneshot, Mutex};
use tracing::warn;

use crate::application::board::{lock, Shared};
use crate::error::FirmataError;

struct Pending<K, T> {
    key: K,
    tx: oneshot::Sender<T>,
}

/// Single-request reply slot keyed by `K`.
pub(crate) struct ReplySlot<K, T> {
    turn: Mutex<()>,
    pending: StdMutex<Option<Pending<K, T>>>,
}

impl<K, T> Default for ReplySlot<K, T> {
    fn default() -> Self {
        Self {
            turn: Mutex::new(()),
            pending: StdMutex::new(None),
        }
    }
}

impl<K: PartialEq + Copy, T> ReplySlot<K, T> {
    fn arm(&self, key: K) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.pending) = Some(Pending { key, tx });
        rx
    }

    fn disarm(&self) {
        lock(&self.pending).take();
    }

    /// Hands `value` to the waiting request if its key matches. Returns the
    /// value back when nothing was waiting for it.
    pub(crate) fn deliver(&self, key: K, value: T) -> Result<(), T> {
        let mut pending = lock(&self.pending);
        match pending.take() {
            Some(p) if p.key == key => p.tx.send(value),
            other => {
                *pending = other;
                Err(value)
            }
        }
    }

    /// Drops the waiting request; its caller sees the connection as closed.
    pub(crate) fn cancel(&self) {
        self.disarm();
    }
}

/// Sends `command` and waits for the reply keyed by `key`.
///
/// The slot is armed before the command is written, so a reply that arrives
/// immediately cannot be missed.
pub(crate) async fn round_trip<K, T>(
    shared: &Shared,
    slot: &ReplySlot<K, T>,
    key: K,
    command: Command,
    timeout: Duration,
) -> Result<T, FirmataError>
where
    K: PartialEq + Copy,
{
    let _turn = slot.turn.lock().await;
    let rx = slot.arm(key);

    if let Err(err) = shared.send(&command).await {
        slot.disarm();
        return Err(err);
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(FirmataError::ConnectionClosed(format!(
            "{} abandoned",
            command.name()
        ))),
        Err(_) => {
            slot.disarm();
            warn!("{} timed out after {timeout:?}", command.name());
            Err(FirmataError::RequestTimeout {
                request: command.name(),
                timeout,
            })
        }
    }
}
