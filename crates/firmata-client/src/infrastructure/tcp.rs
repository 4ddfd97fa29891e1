//! TCP transport.

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::info;

/// Default TCP port of StandardFirmataEthernet / StandardFirmataWiFi.
pub const DEFAULT_PORT: u16 = 3030;

/// Errors that can occur while opening the TCP transport.
#[derive(Debug, Error)]
pub enum TcpTransportError {
    #[error("failed to connect to board at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to board at {addr} after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },
}

/// Connects to `addr` (`host:port`, or `host` for [`DEFAULT_PORT`]) with
/// Nagle's algorithm disabled, since Firmata commands are a few bytes each.
pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream, TcpTransportError> {
    let target = if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{addr}:{DEFAULT_PORT}")
    };

    let stream = tokio::time::timeout(timeout, TcpStream::connect(&target))
        .await
        .map_err(|_| TcpTransportError::Timeout {
            addr: target.clone(),
            timeout,
        })?
        .map_err(|source| TcpTransportError::ConnectFailed {
            addr: target.clone(),
            source,
        })?;

    stream
        .set_nodelay(true)
        .map_err(|source| TcpTransportError::ConnectFailed {
            addr: target.clone(),
            source,
        })?;
    info!("TCP transport open to {target}");
    Ok(stream)
}
