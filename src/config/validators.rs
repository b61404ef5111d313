// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Validator and trust-store configuration (C8, C9).

use serde::{Deserialize, Serialize};

/// Configuration for one registered [`crate::validators::JwtValidator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtValidatorConfig {
    /// Validator name, used only for logging and actor-policy expressions.
    pub name: String,

    /// `iss` claim this validator accepts.
    pub issuer: String,

    /// JWKS endpoint used to fetch verification keys.
    pub jwks_url: String,

    /// Minimum interval between JWKS re-fetches, in seconds. Defaults to
    /// [`crate::validators::jwt`]'s built-in minimum when absent.
    pub refresh_interval_seconds: Option<u64>,
}

/// Configuration for one registered [`crate::validators::JsonValidator`].
///
/// Intended for trusted, pre-validated internal callers (e.g. another
/// service in the same trust domain) that present a `ValidationResult` as a
/// JSON credential rather than a signed token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonValidatorConfig {
    pub name: String,

    /// Request-context claims this validator is allowed to pass through, by
    /// allow-list. Absent means deny everything (safest default).
    #[serde(default)]
    pub allowed_claims: Vec<String>,
}

/// Trust-store configuration: which validators handle which credential
/// type, plus an optional actor-acting-as-actor policy expression (C9).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrustStoreConfig {
    #[serde(default)]
    pub jwt_validators: Vec<JwtValidatorConfig>,

    #[serde(default)]
    pub json_validators: Vec<JsonValidatorConfig>,

    /// `evalexpr` predicate deciding whether a given actor may act for a
    /// given subject, evaluated against `actor_subject`, `actor_issuer`,
    /// `actor_trust_domain`, `actor_scope`, and `validator_name` bindings.
    /// Absent means every actor is permitted.
    pub actor_policy_expression: Option<String>,
}
