//! Connection handshake state machine.
//!
//! After a reset the host walks the board through four queries, each sent
//! once the previous answer arrives:
//!
//! ```text
//! NotConnected
//!   │ start()                      → SYSTEM_RESET
//!   ▼
//! AwaitingProtocolVersion
//!   │ ProtocolVersion              → FirmwareQuery
//!   ▼
//! AwaitingFirmwareName
//!   │ FirmwareResponse             → CapabilityQuery
//!   ▼
//! AwaitingCapabilities
//!   │ CapabilityResponse           → AnalogMappingQuery
//!   ▼
//! AwaitingAnalogMapping
//!   │ AnalogMappingResponse
//!   ▼
//! Ready
//! ```
//!
//! The machine owns no clock and performs no I/O: callers pass the current
//! [`Instant`] in and send whatever [`Command`] comes back. If no step is
//! made for `retry_interval`, [`Handshake::poll_timeout`] asks for another
//! reset without changing state; a protocol version received in any
//! pre-ready state restarts the query sequence from the firmware query.
//! Once `deadline` has passed since [`Handshake::start`] the machine moves to
//! [`ConnectionState::Failed`].

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::protocol::messages::{Command, Message, SysexMessage};

/// Default inactivity window before a reset is re-sent.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(15);
/// Default absolute deadline for reaching [`ConnectionState::Ready`].
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);
/// Minimum spacing between a reset and a reset caused by a protocol fault.
pub const MIN_FAULT_RESET_INTERVAL: Duration = Duration::from_millis(500);

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    NotConnected,
    AwaitingProtocolVersion,
    AwaitingFirmwareName,
    AwaitingCapabilities,
    AwaitingAnalogMapping,
    Ready,
    Failed,
}

impl ConnectionState {
    /// Returns `true` for the four waiting states between reset and ready.
    pub fn is_handshaking(self) -> bool {
        matches!(
            self,
            ConnectionState::AwaitingProtocolVersion
                | ConnectionState::AwaitingFirmwareName
                | ConnectionState::AwaitingCapabilities
                | ConnectionState::AwaitingAnalogMapping
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::NotConnected => "not connected",
            ConnectionState::AwaitingProtocolVersion => "awaiting protocol version",
            ConnectionState::AwaitingFirmwareName => "awaiting firmware name",
            ConnectionState::AwaitingCapabilities => "awaiting capabilities",
            ConnectionState::AwaitingAnalogMapping => "awaiting analog mapping",
            ConnectionState::Ready => "ready",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Timing policy for the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Inactivity window after which a reset is re-sent.
    pub retry_interval: Duration,
    /// Absolute deadline, measured from [`Handshake::start`].
    pub deadline: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

/// What the caller should do after [`Handshake::observe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// The message did not advance the handshake.
    Ignore,
    /// Send this query to the board.
    Send(Command),
    /// The handshake completed.
    Ready,
}

/// What the caller should do after [`Handshake::poll_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    /// No handshake is in progress.
    Idle,
    /// Nothing to do before this instant.
    Wait(Instant),
    /// Re-send `SYSTEM_RESET`; the state is unchanged.
    RetryReset,
    /// The deadline passed; the machine is now [`ConnectionState::Failed`].
    Fail,
}

#[derive(Debug, Clone)]
pub struct Handshake {
    config: HandshakeConfig,
    state: ConnectionState,
    started: Option<Instant>,
    last_progress: Option<Instant>,
    last_reset: Option<Instant>,
    resets: u32,
}

impl Handshake {
    pub fn new(config: HandshakeConfig) -> Self {
        Self {
            config,
            state: ConnectionState::NotConnected,
            started: None,
            last_progress: None,
            last_reset: None,
            resets: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> HandshakeConfig {
        self.config
    }

    /// Number of resets sent since [`Handshake::start`], including the first.
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Begins a handshake and returns the reset to send.
    pub fn start(&mut self, now: Instant) -> Command {
        self.state = ConnectionState::AwaitingProtocolVersion;
        self.started = Some(now);
        self.last_progress = Some(now);
        self.last_reset = Some(now);
        self.resets = 1;
        debug!("handshake started");
        Command::SystemReset
    }

    /// Returns `false` for messages that must be discarded in the current
    /// state. Until a protocol version arrives, everything else is treated
    /// as residue from an earlier session.
    pub fn accepts(&self, message: &Message) -> bool {
        match self.state {
            ConnectionState::NotConnected | ConnectionState::AwaitingProtocolVersion => {
                matches!(message, Message::ProtocolVersion { .. })
            }
            _ => true,
        }
    }

    /// Feeds an inbound message to the machine.
    ///
    /// Registry updates carried by the message must be applied before this
    /// is called, so that `Ready` is only reported for a complete registry.
    pub fn observe(&mut self, message: &Message, now: Instant) -> HandshakeStep {
        if !self.state.is_handshaking() {
            return HandshakeStep::Ignore;
        }

        let (next, step) = match (self.state, message) {
            (_, Message::ProtocolVersion { major, minor }) => {
                if self.state != ConnectionState::AwaitingProtocolVersion {
                    debug!("protocol version {major}.{minor} restarts handshake from {}", self.state);
                }
                (
                    ConnectionState::AwaitingFirmwareName,
                    HandshakeStep::Send(Command::FirmwareQuery),
                )
            }
            (
                ConnectionState::AwaitingFirmwareName,
                Message::Sysex(SysexMessage::FirmwareResponse(_)),
            ) => (
                ConnectionState::AwaitingCapabilities,
                HandshakeStep::Send(Command::CapabilityQuery),
            ),
            (
                ConnectionState::AwaitingCapabilities,
                Message::Sysex(SysexMessage::CapabilityResponse(_)),
            ) => (
                ConnectionState::AwaitingAnalogMapping,
                HandshakeStep::Send(Command::AnalogMappingQuery),
            ),
            (
                ConnectionState::AwaitingAnalogMapping,
                Message::Sysex(SysexMessage::AnalogMappingResponse(_)),
            ) => (ConnectionState::Ready, HandshakeStep::Ready),
            _ => return HandshakeStep::Ignore,
        };

        debug!("handshake: {} -> {}", self.state, next);
        self.state = next;
        self.last_progress = Some(now);
        if next == ConnectionState::Ready {
            info!("handshake complete after {} reset(s)", self.resets);
        }
        step
    }

    /// Checks the retry window and the deadline.
    pub fn poll_timeout(&mut self, now: Instant) -> TimeoutAction {
        if !self.state.is_handshaking() {
            return TimeoutAction::Idle;
        }
        let (Some(started), Some(last_progress)) = (self.started, self.last_progress) else {
            return TimeoutAction::Idle;
        };

        let deadline = started + self.config.deadline;
        if now >= deadline {
            warn!(
                "handshake deadline of {:?} passed in state {}",
                self.config.deadline, self.state
            );
            self.state = ConnectionState::Failed;
            return TimeoutAction::Fail;
        }

        let retry_at = last_progress + self.config.retry_interval;
        if now >= retry_at {
            self.last_progress = Some(now);
            self.last_reset = Some(now);
            self.resets += 1;
            warn!("no handshake progress in state {}, re-sending reset", self.state);
            return TimeoutAction::RetryReset;
        }

        TimeoutAction::Wait(retry_at.min(deadline))
    }

    /// Handles a decode error. Before ready this returns the handshake to
    /// [`ConnectionState::AwaitingProtocolVersion`] and asks for a reset,
    /// unless the last reset went out less than [`MIN_FAULT_RESET_INTERVAL`]
    /// ago. In that case the retry timer sends the next one. After ready it
    /// returns `None`.
    pub fn protocol_fault(&mut self, now: Instant) -> Option<Command> {
        if !self.state.is_handshaking() {
            return None;
        }
        self.state = ConnectionState::AwaitingProtocolVersion;
        self.last_progress = Some(now);

        let recent = self
            .last_reset
            .is_some_and(|at| now.saturating_duration_since(at) < MIN_FAULT_RESET_INTERVAL);
        if recent {
            debug!("reset sent recently, leaving the next one to the retry timer");
            return None;
        }
        self.last_reset = Some(now);
        self.resets += 1;
        Some(Command::SystemReset)
    }

    /// Marks the handshake failed, e.g. when the transport closed.
    pub fn fail(&mut self) {
        self.state = ConnectionState::Failed;
    }

    /// Returns the machine to [`ConnectionState::NotConnected`].
    pub fn close(&mut self) {
        self.state = ConnectionState::NotConnected;
        self.started = None;
        self.last_progress = None;
        self.last_reset = None;
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new(HandshakeConfig::default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{FirmwareInfo, PinCapabilities};

    fn version() -> Message {
        Message::ProtocolVersion { major: 2, minor: 5 }
    }

    fn firmware() -> Message {
        Message::Sysex(SysexMessage::FirmwareResponse(FirmwareInfo {
            major: 2,
            minor: 5,
            name: "StandardFirmata.ino".to_string(),
        }))
    }

    fn capabilities() -> Message {
        Message::Sysex(SysexMessage::CapabilityResponse(vec![PinCapabilities::default()]))
    }

    fn mapping() -> Message {
        Message::Sysex(SysexMessage::AnalogMappingResponse(vec![0x7F]))
    }

    #[test]
    fn test_full_sequence_reaches_ready() {
        let t0 = Instant::now();
        let mut hs = Handshake::default();
        assert_eq!(hs.start(t0), Command::SystemReset);
        assert_eq!(hs.state(), ConnectionState::AwaitingProtocolVersion);

        assert_eq!(hs.observe(&version(), t0), HandshakeStep::Send(Command::FirmwareQuery));
        assert_eq!(hs.state(), ConnectionState::AwaitingFirmwareName);
        assert_eq!(hs.observe(&firmware(), t0), HandshakeStep::Send(Command::CapabilityQuery));
        assert_eq!(hs.state(), ConnectionState::AwaitingCapabilities);
        assert_eq!(
            hs.observe(&capabilities(), t0),
            HandshakeStep::Send(Command::AnalogMappingQuery)
        );
        assert_eq!(hs.state(), ConnectionState::AwaitingAnalogMapping);
        assert_eq!(hs.observe(&mapping(), t0), HandshakeStep::Ready);
        assert_eq!(hs.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_out_of_order_response_is_ignored() {
        let t0 = Instant::now();
        let mut hs = Handshake::default();
        hs.start(t0);
        hs.observe(&version(), t0);
        assert_eq!(hs.observe(&capabilities(), t0), HandshakeStep::Ignore);
        assert_eq!(hs.state(), ConnectionState::AwaitingFirmwareName);
    }

    #[test]
    fn test_only_protocol_version_is_accepted_before_version() {
        let t0 = Instant::now();
        let mut hs = Handshake::default();
        hs.start(t0);
        assert!(!hs.accepts(&firmware()));
        assert!(!hs.accepts(&Message::DigitalPortUpdate { port: 0, bits: 1 }));
        assert!(hs.accepts(&version()));
        hs.observe(&version(), t0);
        assert!(hs.accepts(&firmware()));
    }

    #[test]
    fn test_inactivity_retries_reset_without_changing_state() {
        let t0 = Instant::now();
        let mut hs = Handshake::default();
        hs.start(t0);
        hs.observe(&version(), t0);

        let before = t0 + Duration::from_secs(14);
        assert_eq!(
            hs.poll_timeout(before),
            TimeoutAction::Wait(t0 + Duration::from_secs(15))
        );

        let after = t0 + Duration::from_secs(15);
        assert_eq!(hs.poll_timeout(after), TimeoutAction::RetryReset);
        assert_eq!(hs.state(), ConnectionState::AwaitingFirmwareName);
        assert_eq!(hs.resets(), 2);
        assert_eq!(
            hs.poll_timeout(after),
            TimeoutAction::Wait(t0 + Duration::from_secs(30))
        );
    }

    #[test]
    fn test_version_after_retry_restarts_query_sequence() {
        let t0 = Instant::now();
        let mut hs = Handshake::default();
        hs.start(t0);
        hs.observe(&version(), t0);
        hs.observe(&firmware(), t0);
        assert_eq!(hs.state(), ConnectionState::AwaitingCapabilities);

        assert_eq!(hs.observe(&version(), t0), HandshakeStep::Send(Command::FirmwareQuery));
        assert_eq!(hs.state(), ConnectionState::AwaitingFirmwareName);
    }

    #[test]
    fn test_deadline_moves_to_failed() {
        let t0 = Instant::now();
        let mut hs = Handshake::default();
        hs.start(t0);
        assert_eq!(hs.poll_timeout(t0 + Duration::from_secs(30)), TimeoutAction::Fail);
        assert_eq!(hs.state(), ConnectionState::Failed);
        assert_eq!(hs.poll_timeout(t0 + Duration::from_secs(31)), TimeoutAction::Idle);
    }

    #[test]
    fn test_protocol_fault_before_ready_requests_reset() {
        let t0 = Instant::now();
        let t1 = t0 + MIN_FAULT_RESET_INTERVAL;
        let mut hs = Handshake::default();
        hs.start(t0);
        hs.observe(&version(), t1);
        hs.observe(&firmware(), t1);

        assert_eq!(hs.protocol_fault(t1), Some(Command::SystemReset));
        assert_eq!(hs.state(), ConnectionState::AwaitingProtocolVersion);
        assert_eq!(hs.resets(), 2);
    }

    #[test]
    fn test_repeated_faults_do_not_flood_resets() {
        // Arrange: a board that answers every reset with a broken frame.
        let t0 = Instant::now();
        let mut hs = Handshake::default();
        hs.start(t0);

        // Act
        let mut sent = 0;
        for i in 0..1000u64 {
            let now = t0 + Duration::from_millis(i);
            hs.observe(&version(), now);
            if hs.protocol_fault(now).is_some() {
                sent += 1;
            }
        }

        // Assert: one fault reset per interval at most.
        assert_eq!(sent, 1);
        assert_eq!(hs.resets(), 2);
        assert_eq!(hs.state(), ConnectionState::AwaitingProtocolVersion);
    }

    #[test]
    fn test_fault_without_reset_leaves_retry_to_the_timer() {
        let t0 = Instant::now();
        let mut hs = Handshake::default();
        hs.start(t0);
        hs.observe(&version(), t0);

        assert_eq!(hs.protocol_fault(t0), None);

        let retry_at = t0 + DEFAULT_RETRY_INTERVAL;
        assert_eq!(hs.poll_timeout(t0), TimeoutAction::Wait(retry_at));
        assert_eq!(hs.poll_timeout(retry_at), TimeoutAction::RetryReset);
    }

    #[test]
    fn test_protocol_fault_after_ready_is_not_a_reset() {
        let t0 = Instant::now();
        let mut hs = Handshake::default();
        hs.start(t0);
        for message in [version(), firmware(), capabilities(), mapping()] {
            hs.observe(&message, t0);
        }
        assert_eq!(hs.protocol_fault(t0), None);
        assert_eq!(hs.state(), ConnectionState::Ready);
        assert_eq!(hs.observe(&version(), t0), HandshakeStep::Ignore);
    }

    #[test]
    fn test_close_returns_to_not_connected() {
        let t0 = Instant::now();
        let mut hs = Handshake::default();
        hs.start(t0);
        hs.close();
        assert_eq!(hs.state(), ConnectionState::NotConnected);
        assert_eq!(hs.poll_timeout(t0), TimeoutAction::Idle);
    }
}
