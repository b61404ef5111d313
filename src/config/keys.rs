// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rotating key manager configuration: one entry per signed token type.

use crate::error::ParsecError;
use crate::keys::RotationParams;
use chrono::Duration;
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

/// Configuration for a single [`crate::keys::RotatingKeyManager`] instance.
///
/// Durations are expressed in seconds in the configuration file and
/// converted to [`chrono::Duration`] when building [`RotationParams`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyManagerConfig {
    /// Token type URN this key manager signs for, e.g.
    /// `urn:ietf:params:oauth:token-type:txn_token`.
    pub token_type: String,

    /// Signing algorithm. Only RSA variants are supported by
    /// [`crate::keys::RsaKeyProvider`].
    #[serde(default = "default_algorithm", with = "algorithm_serde")]
    pub algorithm: Algorithm,

    #[serde(default = "default_key_ttl_seconds")]
    pub key_ttl_seconds: i64,

    #[serde(default = "default_rotation_threshold_seconds")]
    pub rotation_threshold_seconds: i64,

    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: i64,

    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: i64,

    #[serde(default = "default_prepare_timeout_seconds")]
    pub prepare_timeout_seconds: i64,
}

fn default_algorithm() -> Algorithm {
    Algorithm::RS256
}

fn default_key_ttl_seconds() -> i64 {
    24 * 3600
}

fn default_rotation_threshold_seconds() -> i64 {
    6 * 3600
}

fn default_grace_period_seconds() -> i64 {
    2 * 3600
}

fn default_check_interval_seconds() -> i64 {
    60
}

fn default_prepare_timeout_seconds() -> i64 {
    60
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            token_type: "urn:ietf:params:oauth:token-type:txn_token".to_string(),
            algorithm: default_algorithm(),
            key_ttl_seconds: default_key_ttl_seconds(),
            rotation_threshold_seconds: default_rotation_threshold_seconds(),
            grace_period_seconds: default_grace_period_seconds(),
            check_interval_seconds: default_check_interval_seconds(),
            prepare_timeout_seconds: default_prepare_timeout_seconds(),
        }
    }
}

impl KeyManagerConfig {
    pub fn rotation_params(&self) -> Result<RotationParams, ParsecError> {
        let params = RotationParams {
            key_ttl: Duration::seconds(self.key_ttl_seconds),
            rotation_threshold: Duration::seconds(self.rotation_threshold_seconds),
            grace_period: Duration::seconds(self.grace_period_seconds),
            check_interval: Duration::seconds(self.check_interval_seconds),
            prepare_timeout: Duration::seconds(self.prepare_timeout_seconds),
        };
        params.validate()?;
        Ok(params)
    }
}

mod algorithm_serde {
    use jsonwebtoken::Algorithm;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(value: &Algorithm, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:?}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Algorithm, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Algorithm::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_internally_consistent() {
        let config = KeyManagerConfig::default();
        assert!(config.rotation_params().is_ok());
    }

    #[test]
    fn inconsistent_params_are_rejected() {
        let mut config = KeyManagerConfig::default();
        config.grace_period_seconds = config.key_ttl_seconds;
        assert!(config.rotation_params().is_err());
    }
}
