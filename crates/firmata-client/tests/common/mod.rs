//! Scripted in-memory Firmata board for integration tests.
//!
//! The board sits on the far end of a `tokio::io::duplex` pipe. It records
//! every byte the host sends, answers the handshake queries from a
//! [`BoardScript`], and lets a test inject arbitrary bytes towards the host.

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use firmata_client::ClientConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

const START_SYSEX: u8 = 0xF0;
const END_SYSEX: u8 = 0xF7;

/// How the fake board answers.
#[derive(Debug, Clone)]
pub struct BoardScript {
    /// Answer `SYSTEM_RESET` with a protocol version report.
    pub answer_reset: bool,
    /// Bytes sent before the protocol version on every reset.
    pub preamble: Vec<u8>,
    pub firmware_name: String,
    pub capabilities: Vec<u8>,
    pub mapping: Vec<u8>,
    /// Answer I2C read requests with `[0, 1, 2, ...]`.
    pub i2c_replies: bool,
    /// Answer SPI transfers by echoing the data back inverted.
    pub spi_replies: bool,
    /// Number of capability queries answered with a truncated body before
    /// `capabilities` is sent.
    pub broken_capability_replies: usize,
    /// Pause before answering a capability query.
    pub capability_delay: Duration,
}

impl Default for BoardScript {
    fn default() -> Self {
        Self {
            answer_reset: true,
            preamble: Vec::new(),
            firmware_name: "StandardFirmata.ino".to_string(),
            capabilities: uno_capabilities(),
            mapping: uno_mapping(),
            i2c_replies: false,
            spi_replies: false,
            broken_capability_replies: 0,
            capability_delay: Duration::ZERO,
        }
    }
}

/// Uno-like board: pins 0-13 input/output, PWM and servo on 3, 5, 6, 9, 10
/// and 11, pins 14-19 also analog (channels 0-5), I2C on 18 and 19.
pub fn uno_capabilities() -> Vec<u8> {
    let mut body = Vec::new();
    for pin in 0..20u8 {
        body.extend_from_slice(&[0x00, 0x01, 0x01, 0x01]);
        if [3, 5, 6, 9, 10, 11].contains(&pin) {
            body.extend_from_slice(&[0x03, 0x08, 0x04, 0x0E]);
        }
        if pin >= 14 {
            body.extend_from_slice(&[0x02, 0x0A]);
        }
        if pin == 18 || pin == 19 {
            body.extend_from_slice(&[0x06, 0x01]);
        }
        body.push(0x7F);
    }
    body
}

pub fn uno_mapping() -> Vec<u8> {
    (0..20u8).map(|pin| if pin >= 14 { pin - 14 } else { 0x7F }).collect()
}

/// Config with short timings so failures surface quickly.
pub fn fast_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.handshake.retry_interval_ms = 100;
    config.handshake.deadline_ms = 2_000;
    config.requests.timeout_ms = 200;
    config
}

/// Handle to a running fake board.
pub struct FakeBoard {
    received: Arc<Mutex<Vec<u8>>>,
    inject: mpsc::UnboundedSender<Option<Vec<u8>>>,
}

impl FakeBoard {
    /// Starts a board task and returns the host end of the pipe.
    pub fn spawn(script: BoardScript) -> (DuplexStream, FakeBoard) {
        let (host, board) = tokio::io::duplex(64 * 1024);
        let received = Arc::new(Mutex::new(Vec::new()));
        let (inject, inject_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_board(board, script, Arc::clone(&received), inject_rx));
        (host, FakeBoard { received, inject })
    }

    /// Every byte the host has sent so far.
    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }

    pub fn clear_received(&self) {
        self.received.lock().unwrap().clear();
    }

    /// Number of `SYSTEM_RESET` bytes the host has sent.
    pub fn resets(&self) -> usize {
        self.received().iter().filter(|&&b| b == 0xFF).count()
    }

    /// Sends `bytes` to the host.
    pub fn inject(&self, bytes: &[u8]) {
        let _ = self.inject.send(Some(bytes.to_vec()));
    }

    /// Closes the board end of the pipe.
    pub fn close(&self) {
        let _ = self.inject.send(None);
    }

    /// Waits until the host has sent at least `n` bytes.
    pub async fn wait_for_bytes(&self, n: usize) -> Vec<u8> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let bytes = self.received();
            if bytes.len() >= n || tokio::time::Instant::now() >= deadline {
                return bytes;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Host end of the pipe whose writes can be made to fail.
pub struct FailingWrites {
    inner: DuplexStream,
    fail: Arc<AtomicBool>,
}

impl FailingWrites {
    /// Wraps `inner`; writes fail once the returned flag is set.
    pub fn new(inner: DuplexStream) -> (Self, Arc<AtomicBool>) {
        let fail = Arc::new(AtomicBool::new(false));
        (
            Self {
                inner,
                fail: Arc::clone(&fail),
            },
            fail,
        )
    }
}

impl AsyncRead for FailingWrites {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for FailingWrites {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "write refused")));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

async fn run_board(
    mut port: DuplexStream,
    mut script: BoardScript,
    received: Arc<Mutex<Vec<u8>>>,
    mut inject: mpsc::UnboundedReceiver<Option<Vec<u8>>>,
) {
    let mut buf = [0u8; 1024];
    let mut sysex: Option<Vec<u8>> = None;

    loop {
        tokio::select! {
            read = port.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                received.lock().unwrap().extend_from_slice(&buf[..n]);

                let mut replies = Vec::new();
                let mut delay = Duration::ZERO;
                for &byte in &buf[..n] {
                    if let Some(frame) = sysex.as_mut() {
                        if byte == END_SYSEX {
                            let frame = sysex.take().unwrap_or_default();
                            if frame == [0x6B] {
                                delay = script.capability_delay;
                            }
                            replies.extend(answer_sysex(&mut script, &frame));
                            continue;
                        }
                        if byte & 0x80 == 0 || (byte == 0x80 && frame.is_empty()) {
                            frame.push(byte);
                            continue;
                        }
                        sysex = None;
                    }
                    match byte {
                        START_SYSEX => sysex = Some(Vec::new()),
                        0xFF if script.answer_reset => {
                            replies.extend_from_slice(&script.preamble);
                            replies.extend_from_slice(&[0xF9, 0x02, 0x05]);
                        }
                        _ => {}
                    }
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if !replies.is_empty() && port.write_all(&replies).await.is_err() {
                    return;
                }
            }
            bytes = inject.recv() => match bytes {
                Some(Some(bytes)) => {
                    if port.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
                _ => return,
            },
        }
    }
}

fn sysex_frame(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![START_SYSEX, id];
    frame.extend_from_slice(payload);
    frame.push(END_SYSEX);
    frame
}

fn pairs(data: &[u8]) -> Vec<u8> {
    data.iter().flat_map(|b| [b & 0x7F, b >> 7]).collect()
}

fn answer_sysex(script: &mut BoardScript, frame: &[u8]) -> Vec<u8> {
    match frame {
        [0x79] => {
            let mut payload = vec![0x02, 0x05];
            payload.extend(pairs(script.firmware_name.as_bytes()));
            sysex_frame(0x79, &payload)
        }
        [0x6B] if script.broken_capability_replies > 0 => {
            script.broken_capability_replies -= 1;
            // A mode byte without its resolution.
            sysex_frame(0x6C, &[0x00, 0x01, 0x01])
        }
        [0x6B] => sysex_frame(0x6C, &script.capabilities),
        [0x69] => sysex_frame(0x6A, &script.mapping),
        // I2C read: addr_lsb, (mode << 3), register pair, count pair
        [0x76, addr, mode, rest @ ..] if script.i2c_replies && (mode >> 3) & 0x03 == 0x01 => {
            let (register, count) = match rest {
                [r0, r1, c0, c1] => (u16::from(*r0) | u16::from(*r1) << 7, u16::from(*c0) | u16::from(*c1) << 7),
                [c0, c1] => (0, u16::from(*c0) | u16::from(*c1) << 7),
                _ => return Vec::new(),
            };
            let mut payload = vec![*addr, 0x00, (register & 0x7F) as u8, (register >> 7) as u8];
            let data: Vec<u8> = (0..count as u8).collect();
            payload.extend(pairs(&data));
            sysex_frame(0x77, &payload)
        }
        // SPI transfer: 0x20, cs pair, data pairs
        [0x80, 0x20, cs0, cs1, data @ ..] if script.spi_replies => {
            let bytes: Vec<u8> = data
                .chunks_exact(2)
                .map(|p| !(p[0] | (p[1] << 7)))
                .collect();
            let mut payload = vec![0x20, *cs0, *cs1];
            payload.extend(pairs(&bytes));
            sysex_frame(0x80, &payload)
        }
        _ => Vec::new(),
    }
}
