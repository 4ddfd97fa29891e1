//! Infrastructure layer for the client application.
//!
//! Contains OS-facing adapters: the TCP transport and config file loading.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `firmata_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`tcp`** – Opens a TCP connection to a board running a network
//!   Firmata (StandardFirmataEthernet, StandardFirmataWiFi) or to a
//!   serial-to-TCP bridge such as `ser2net`.
//!
//! - **`config_file`** – Reads a [`crate::ClientConfig`] from a TOML file.

pub mod config_file;
pub mod tcp;
