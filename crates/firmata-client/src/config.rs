//! Client configuration schema.
//!
//! Every field has a default, so an empty TOML document (or no file at all)
//! yields a working configuration:
//!
//! ```toml
//! log_level = "info"
//!
//! [handshake]
//! retry_interval_ms = 15000
//! deadline_ms = 30000
//!
//! [events]
//! capacity = 256
//!
//! [requests]
//! timeout_ms = 1000
//! ```
//!
//! Loading from disk lives in [`crate::infrastructure::config_file`].

use std::path::PathBuf;
use std::time::Duration;

use firmata_core::HandshakeConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// `tracing` filter used by the binary when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub handshake: HandshakeSection,
    #[serde(default)]
    pub events: EventsSection,
    #[serde(default)]
    pub requests: RequestsSection,
}

/// Handshake timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeSection {
    /// Inactivity window after which the reset is re-sent.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// Absolute deadline for reaching ready.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

/// Value-event buffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventsSection {
    /// Number of events buffered per subscriber before the oldest are
    /// dropped.
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

/// Request/reply extensions (I2C, SPI).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestsSection {
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_retry_interval_ms() -> u64 {
    15_000
}
fn default_deadline_ms() -> u64 {
    30_000
}
fn default_event_capacity() -> usize {
    256
}
fn default_request_timeout_ms() -> u64 {
    1_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            handshake: HandshakeSection::default(),
            events: EventsSection::default(),
            requests: RequestsSection::default(),
        }
    }
}

impl Default for HandshakeSection {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            deadline_ms: default_deadline_ms(),
        }
    }
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

impl Default for RequestsSection {
    fn default() -> Self {
        Self {
            timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ClientConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`]
    /// for out-of-range values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.events.capacity == 0 {
            return Err(ConfigError::Invalid("events.capacity must be at least 1".into()));
        }
        if self.handshake.retry_interval_ms == 0 || self.handshake.deadline_ms == 0 {
            return Err(ConfigError::Invalid(
                "handshake intervals must be greater than zero".into(),
            ));
        }
        if self.requests.timeout_ms == 0 {
            return Err(ConfigError::Invalid("requests.timeout_ms must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            retry_interval: Duration::from_millis(self.handshake.retry_interval_ms),
            deadline: Duration::from_millis(self.handshake.deadline_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.requests.timeout_ms)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
