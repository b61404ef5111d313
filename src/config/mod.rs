// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the Parsec token-exchange service.
//!
//! This module loads, validates, and applies configuration settings. The
//! configuration is backed by a YAML file and validated against a JSON
//! schema before being deserialized.
//!
//! ## Configuration Structure
//!
//! - `server`: network binding and TLS settings for the Rocket server
//! - `trust_domain`: the `aud` this service issues and validates tokens for
//! - `key_managers`: one [`RotatingKeyManager`](crate::keys::RotatingKeyManager) per signed token type
//! - `unsigned_token_types`: token types served by the unsigned issuer
//! - `trust_store`: registered validators and the actor-acting-as-actor policy
//! - `datasources`: the data-source registry, including optional clustering
//! - `claim_mapping`: the `tctx`/`req_ctx` mapper chains and request-context filters
//! - `external_authz`: response header and token type used by the ext_authz hook

pub mod claims_mapping;
pub mod datasources;
pub mod keys;
pub mod server;
pub mod utils;
pub mod validators;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use claims_mapping::{
    ClaimExpressionConfig, ClaimMappingConfig, ClaimsFilterConfig, RequestContextFilterConfig,
};
pub use datasources::{ClusterConfig, ClusterPeerConfig, DataSourceRegistryConfig, StaticDataSourceConfig};
pub use keys::KeyManagerConfig;
pub use server::ServerConfig;
pub use utils::output_config_schema;
pub use validators::{JsonValidatorConfig, JwtValidatorConfig, TrustStoreConfig};

/// Response header and requested token type for the Envoy-style
/// external-authorization hook (C15, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalAuthzConfig {
    /// Header the minted token is returned in on success.
    #[serde(default = "default_response_header")]
    pub response_header: String,

    /// Token type requested from the [`crate::token_service::TokenService`].
    #[serde(default = "default_external_authz_token_type")]
    pub token_type: String,

    /// Request header carrying the inbound credential, stripped from the
    /// proxied request only on successful issuance (§7 side-channel discipline).
    #[serde(default = "default_credential_header")]
    pub credential_header: String,
}

fn default_response_header() -> String {
    "Transaction-Token".to_string()
}

fn default_external_authz_token_type() -> String {
    crate::issuers::TRANSACTION_TOKEN_TYPE.to_string()
}

fn default_credential_header() -> String {
    "authorization".to_string()
}

impl Default for ExternalAuthzConfig {
    fn default() -> Self {
        Self {
            response_header: default_response_header(),
            token_type: default_external_authz_token_type(),
            credential_header: default_credential_header(),
        }
    }
}

fn default_trust_domain() -> String {
    "parsec.local".to_string()
}

/// Root configuration structure for the Parsec token-exchange service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The trust domain this service issues and validates tokens for,
    /// matched against the `audience` parameter on token exchange (§4.7).
    #[serde(default = "default_trust_domain")]
    pub trust_domain: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub key_managers: Vec<KeyManagerConfig>,

    /// Additional token types served by the unsigned issuer, alongside
    /// whatever `key_managers` configures for signed issuance.
    #[serde(default)]
    pub unsigned_token_types: Vec<String>,

    #[serde(default)]
    pub trust_store: TrustStoreConfig,

    #[serde(default)]
    pub datasources: DataSourceRegistryConfig,

    #[serde(default)]
    pub claim_mapping: ClaimMappingConfig,

    #[serde(default)]
    pub external_authz: ExternalAuthzConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trust_domain: default_trust_domain(),
            server: ServerConfig::default(),
            key_managers: vec![KeyManagerConfig::default()],
            unsigned_token_types: Vec::new(),
            trust_store: TrustStoreConfig::default(),
            datasources: DataSourceRegistryConfig::default(),
            claim_mapping: ClaimMappingConfig::default(),
            external_authz: ExternalAuthzConfig::default(),
        }
    }
}

impl Config {
    /// Helper to create a sample config file alongside one that failed validation.
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Creating sample configuration file at {:?}", sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create parent directory for sample config at {:?}", parent)
                })?;
            }
        }

        let sample_config = Self::default();
        sample_config
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Loads configuration from a file, creating a default one if it does not exist.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("Configuration file not found at {:?}, creating default", path);
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;
        let json_value = serde_json::to_value(&yaml_value)
            .with_context(|| format!("Failed to convert YAML to JSON for validation: {:?}", path))?;

        let schema_str = include_str!("../../resources/config.schema.json");
        let schema: serde_json::Value =
            serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;
        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                Self::create_sample_config(path)?;
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        if let Err(err) = utils::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Saves the configuration to a file in YAML format.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;
        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;
        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Applies command-line overrides. Only values explicitly provided
    /// override what was loaded from the configuration file.
    pub fn apply_args(
        &mut self,
        port: Option<u16>,
        address: Option<String>,
        trust_domain: Option<String>,
    ) {
        if let Some(port) = port {
            debug!("Overriding port from command line: {}", port);
            self.server.port = port;
        }
        if let Some(address) = address {
            debug!("Overriding address from command line: {}", address);
            self.server.address = address;
        }
        if let Some(trust_domain) = trust_domain {
            debug!("Overriding trust domain from command line: {}", trust_domain);
            self.trust_domain = trust_domain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yml::to_string(&config).unwrap();
        let parsed: Config = serde_yml::from_str(&yaml).unwrap();
        assert_eq!(parsed.trust_domain, config.trust_domain);
        assert_eq!(parsed.server.port, config.server.port);
    }

    #[test]
    fn default_config_passes_specific_validation() {
        let config = Config::default();
        assert!(utils::validate_specific_rules(&config).is_ok());
    }
}
