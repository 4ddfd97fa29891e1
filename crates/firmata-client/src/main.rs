//! firmata-client command-line entry point.
//!
//! Connects to a board over TCP, runs the handshake, prints the pin table and
//! logs every event until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load config (--config, else ./firmata-client.toml, else defaults)
//!  └─ tcp::connect()              -- open the transport
//!  └─ FirmataClient::connect()    -- handshake until ready
//!  └─ optional: sampling interval, analog reporting
//!  └─ event loop
//!       ├─ AnalogValue / DigitalPort / ...  -> log
//!       ├─ Lagged(n)                        -> warn about dropped events
//!       └─ Disconnected / Ctrl-C            -> exit
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use firmata_client::infrastructure::{config_file, tcp};
use firmata_client::{BoardEvent, FirmataClient};
use firmata_core::PinMode;

/// Config file read from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "firmata-client.toml";

/// Monitor a Firmata board over TCP.
#[derive(Debug, Parser)]
#[command(name = "firmata-client", version, about)]
struct Cli {
    /// Board address, `host:port` or `host` (port 3030).
    #[arg(short, long, env = "FIRMATA_ADDRESS", default_value = "127.0.0.1:3030")]
    address: String,

    /// TOML configuration file. Without it, `firmata-client.toml` is read
    /// if present.
    #[arg(short, long, env = "FIRMATA_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, overriding the config file (e.g. `debug`, `firmata_client=trace`).
    #[arg(long)]
    log_level: Option<String>,

    /// Enable analog reporting on every analog-capable pin.
    #[arg(long)]
    report_analog: bool,

    /// Analog sampling interval in milliseconds.
    #[arg(long)]
    sampling_interval: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config_file::load_config(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => config_file::load_config_or_default(Path::new(DEFAULT_CONFIG_FILE))
            .with_context(|| format!("loading config from {DEFAULT_CONFIG_FILE}"))?,
    };
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }

    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("firmata-client starting");

    let stream = tcp::connect(&cli.address, Duration::from_secs(5))
        .await
        .context("opening transport")?;

    let client = FirmataClient::new(config);
    let mut events = client.subscribe();
    client.connect(stream).await.context("board handshake")?;

    if let Some((major, minor)) = client.protocol_version() {
        info!("protocol {major}.{minor}");
    }
    for (index, pin) in client.pins().iter().enumerate() {
        let modes: Vec<String> = pin.supported.iter().map(|m| m.to_string()).collect();
        match pin.analog_channel {
            Some(channel) => info!("pin {index:>3}: [{}] A{channel}", modes.join(", ")),
            None => info!("pin {index:>3}: [{}]", modes.join(", ")),
        }
    }

    if let Some(millis) = cli.sampling_interval {
        client
            .set_sampling_interval(millis)
            .await
            .context("setting sampling interval")?;
    }
    if cli.report_analog {
        let analog_pins: Vec<usize> = client
            .pins()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.analog_channel.is_some() && p.supports(PinMode::Analog))
            .map(|(i, _)| i)
            .collect();
        for pin in analog_pins {
            client
                .pin_mode(pin, PinMode::Analog)
                .await
                .with_context(|| format!("enabling analog reporting on pin {pin}"))?;
        }
    }

    // ── Event loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Ok(BoardEvent::Disconnected { reason }) => {
                    warn!("board disconnected: {reason}");
                    return Ok(());
                }
                Ok(event) => info!("{event:?}"),
                Err(RecvError::Lagged(dropped)) => warn!("dropped {dropped} event(s)"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.disconnect().await?;
    Ok(())
}
