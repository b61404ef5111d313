// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities: schema output and cross-field validation rules
//! that don't fit cleanly into the JSON schema.

use anyhow::{Context, Result};
use base64::Engine;
use log::debug;
use std::collections::HashSet;

use super::Config;

/// Outputs the embedded JSON schema to stdout, invoked by `--show-config-schema`.
pub fn output_config_schema() -> Result<()> {
    let schema_str = include_str!("../../resources/config.schema.json");
    let schema: serde_json::Value =
        serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;
    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;
    println!("{}", formatted_schema);
    Ok(())
}

/// Validates a string is a usable bind address: a parseable IP or a handful
/// of conventional aliases.
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Deeper validation that can't be easily expressed in a JSON schema:
/// TLS cert/key pairing, base64 encoding, rotation parameter ordering, and
/// duplicate name detection across registries.
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional configuration validation checks");

    if let Some(cert) = &config.server.cert {
        if config.server.key.is_none() {
            anyhow::bail!("TLS certificate provided without a key");
        }
        base64::engine::general_purpose::STANDARD
            .decode(cert)
            .context("TLS certificate is not valid base64")?;
    }
    if let Some(key) = &config.server.key {
        if config.server.cert.is_none() {
            anyhow::bail!("TLS key provided without a certificate");
        }
        base64::engine::general_purpose::STANDARD
            .decode(key)
            .context("TLS key is not valid base64")?;
    }

    if config.server.port == 0 {
        anyhow::bail!("Invalid port number: {}", config.server.port);
    }
    if !is_valid_ip_address(&config.server.address) {
        debug!("Potentially invalid address format: {}", config.server.address);
    }

    let mut seen_token_types = HashSet::new();
    for key_manager in &config.key_managers {
        key_manager
            .rotation_params()
            .with_context(|| format!("invalid rotation parameters for '{}'", key_manager.token_type))?;
        if !seen_token_types.insert(key_manager.token_type.clone()) {
            anyhow::bail!("duplicate key manager token type '{}'", key_manager.token_type);
        }
    }
    for token_type in &config.unsigned_token_types {
        if !seen_token_types.insert(token_type.clone()) {
            anyhow::bail!("duplicate issuer registration for token type '{}'", token_type);
        }
    }

    let mut seen_validators = HashSet::new();
    for validator in &config.trust_store.jwt_validators {
        if !seen_validators.insert(validator.name.clone()) {
            anyhow::bail!("duplicate validator name '{}'", validator.name);
        }
        url::Url::parse(&validator.jwks_url)
            .with_context(|| format!("invalid jwks_url for validator '{}'", validator.name))?;
    }
    for validator in &config.trust_store.json_validators {
        if !seen_validators.insert(validator.name.clone()) {
            anyhow::bail!("duplicate validator name '{}'", validator.name);
        }
    }

    let mut seen_sources = HashSet::new();
    for source in &config.datasources.static_sources {
        if !seen_sources.insert(source.name.clone()) {
            anyhow::bail!("duplicate data source name '{}'", source.name);
        }
    }

    if let Some(cluster) = &config.datasources.cluster {
        let mut seen_peers = HashSet::new();
        for peer in &cluster.peers {
            if !seen_peers.insert(peer.id.clone()) {
                anyhow::bail!("duplicate cluster peer id '{}'", peer.id);
            }
            url::Url::parse(&peer.base_url)
                .with_context(|| format!("invalid base_url for cluster peer '{}'", peer.id))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ip_addresses_are_recognized() {
        assert!(is_valid_ip_address("127.0.0.1"));
        assert!(is_valid_ip_address("::1"));
        assert!(is_valid_ip_address("0.0.0.0"));
        assert!(is_valid_ip_address("localhost"));
    }

    #[test]
    fn garbage_address_is_rejected() {
        assert!(!is_valid_ip_address("not-an-address!!"));
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let mut config = Config::default();
        config.server.cert = Some("Y2VydA==".to_string());
        config.server.key = None;
        assert!(validate_specific_rules(&config).is_err());
    }

    #[test]
    fn duplicate_key_manager_token_type_is_rejected() {
        let mut config = Config::default();
        let duplicate = config.key_managers[0].clone();
        config.key_managers.push(duplicate);
        assert!(validate_specific_rules(&config).is_err());
    }
}
