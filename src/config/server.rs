// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! HTTP server binding and TLS configuration.

use serde::{Deserialize, Serialize};

/// Network binding and TLS settings for the Rocket server.
///
/// If `cert` and `key` are both present the server starts in TLS mode; if
/// either is absent it starts in plain HTTP mode. Providing only one of the
/// two is rejected during validation (§ config validation rules).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP port the server listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Network address to bind to.
    #[serde(default = "default_address")]
    pub address: String,

    /// Server name reported in HTTP headers and logs.
    #[serde(default = "default_name")]
    pub name: String,

    /// TLS certificate chain in PEM format, Base64 encoded. Absent by
    /// default: this workspace carries no bundled certificate material, so
    /// TLS is opt-in via explicit configuration rather than a dev default.
    #[serde(default)]
    pub cert: Option<String>,

    /// TLS private key in PEM format, Base64 encoded.
    #[serde(default)]
    pub key: Option<String>,

    /// Enable or disable the server entirely.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_port() -> u16 {
    8443
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_name() -> String {
    format!("parsec/{}", env!("CARGO_PKG_VERSION"))
}

fn default_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            address: default_address(),
            name: default_name(),
            cert: None,
            key: None,
            enabled: default_enabled(),
        }
    }
}
