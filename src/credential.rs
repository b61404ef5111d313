// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Core data model: credentials in, a validation `Result` out, and the
//! request-scoped context that flows from a validated subject through
//! enrichment and claim mapping to an issued token (§3).

use crate::claims::Claims;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The wire-level credential type a caller presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CredentialType {
    Bearer,
    Jwt,
    Oidc,
    Mtls,
    Json,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::Bearer => "bearer",
            CredentialType::Jwt => "jwt",
            CredentialType::Oidc => "oidc",
            CredentialType::Mtls => "mtls",
            CredentialType::Json => "json",
        }
    }
}

/// Sentinel issuer name used for opaque bearer tokens that carry no `iss`
/// claim of their own (§4.1, §9 open question: a long-term design may
/// replace this with introspection or a credential factory).
pub const BEARER_SENTINEL_ISSUER: &str = "bearer";

/// A credential presented by a caller, carrying exactly the bytes needed for
/// validation plus enough to name an issuer.
///
/// `Type()` is constant per variant by construction: each variant maps to
/// exactly one `CredentialType`.
#[derive(Debug, Clone)]
pub enum Credential {
    /// An opaque bearer string with no independently verifiable issuer;
    /// the issuer is always [`BEARER_SENTINEL_ISSUER`] unless a caller
    /// supplies a configured override via `configured_issuer`.
    Bearer {
        token: String,
        configured_issuer: Option<String>,
    },
    /// A compact JWS. `issuer` is pulled from the unverified `iss` claim
    /// purely to select a validator; the validator itself re-verifies it.
    Jwt { token: String, issuer: String },
    /// An OIDC ID token, validated the same way as a JWT but tagged
    /// separately so a TrustStore may route it to a distinct validator.
    Oidc { token: String, issuer: String },
    /// Client certificate bytes (DER) plus the issuer name from the
    /// certificate's issuing CA, as resolved by the external collaborator
    /// that terminates TLS.
    Mtls {
        certificate_der: Vec<u8>,
        issuer: String,
    },
    /// A pre-validated JSON document, used on test and trusted-caller paths.
    Json { body: Vec<u8>, issuer: String },
}

impl Credential {
    /// The constant `CredentialType` for this variant.
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Credential::Bearer { .. } => CredentialType::Bearer,
            Credential::Jwt { .. } => CredentialType::Jwt,
            Credential::Oidc { .. } => CredentialType::Oidc,
            Credential::Mtls { .. } => CredentialType::Mtls,
            Credential::Json { .. } => CredentialType::Json,
        }
    }

    /// The issuer used to select a validator from the trust store.
    pub fn issuer(&self) -> &str {
        match self {
            Credential::Bearer {
                configured_issuer, ..
            } => configured_issuer
                .as_deref()
                .unwrap_or(BEARER_SENTINEL_ISSUER),
            Credential::Jwt { issuer, .. }
            | Credential::Oidc { issuer, .. }
            | Credential::Json { issuer, .. }
            | Credential::Mtls { issuer, .. } => issuer,
        }
    }
}

/// Outcome of successfully validating a [`Credential`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Non-empty subject identifier.
    pub subject: String,
    pub issuer: String,
    pub trust_domain: String,
    pub claims: Claims,
    pub issued_at: DateTime<Utc>,
    /// Invariant: when present, strictly after `issued_at`.
    pub expires_at: Option<DateTime<Utc>>,
    pub audience: Vec<String>,
    /// Space-delimited scope string, as it appears on the wire.
    pub scope: String,
}

impl ValidationResult {
    /// The distinguished anonymous result used when no actor is presented.
    pub fn anonymous(trust_domain: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            subject: "anonymous".to_string(),
            issuer: BEARER_SENTINEL_ISSUER.to_string(),
            trust_domain: trust_domain.into(),
            claims: Claims::new(),
            issued_at: now,
            expires_at: None,
            audience: Vec::new(),
            scope: String::new(),
        }
    }

    /// True for the distinguished anonymous result.
    pub fn is_anonymous(&self) -> bool {
        self.subject == "anonymous"
    }

    /// Validates the `expires_at`-after-`issued_at` invariant.
    pub fn is_temporally_valid(&self) -> bool {
        match self.expires_at {
            Some(exp) => exp > self.issued_at,
            None => true,
        }
    }
}

/// HTTP-shaped request attributes threaded through enrichment and claim
/// mapping. JSON-serializable so it can cross the external-authz RPC
/// boundary and the cluster cache RPC boundary unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestAttributes {
    pub method: String,
    pub path: String,
    pub ip_address: String,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    /// Implementation context extensions (e.g. `host`), deliberately
    /// loosely typed since the external-authz surface carries arbitrary
    /// string/string context extensions (§6).
    pub additional: BTreeMap<String, serde_json::Value>,
}

/// Input to a [`crate::datasource::DataSource::fetch`] call.
///
/// Borrowed for the duration of the call: implementations MUST NOT retain
/// references beyond `fetch`'s return (§3).
#[derive(Debug, Clone, Copy)]
pub struct DataSourceInput<'a> {
    pub subject: &'a ValidationResult,
    pub actor: Option<&'a ValidationResult>,
    pub request_attributes: &'a RequestAttributes,
}

/// Content type of data a [`crate::datasource::DataSource`] produces.
///
/// The registry rejects unknown types at deserialization time; `Json` is
/// the only content type required today (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Json,
}

/// What a data source produced for one fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceResult {
    pub data: Vec<u8>,
    pub content_type: ContentType,
}

/// Exactly what a data source produced, serialized once for cross-process
/// transport through the cluster cache (§3, §4.3).
pub type CacheEntry = DataSourceResult;

/// The value a token service hands an issuer. Immutable through issuance;
/// claim mappers read from it (§3).
#[derive(Clone)]
pub struct IssueContext {
    pub subject: ValidationResult,
    pub actor: Option<ValidationResult>,
    pub request_attributes: RequestAttributes,
    pub data_source_registry: Arc<dyn crate::datasource::DataSourceLookup>,
    pub audience: Vec<String>,
    pub scope: String,
}

/// A minted token. `value` is opaque to callers; for signed tokens it is the
/// compact JWS form (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_credential_uses_sentinel_issuer_by_default() {
        let cred = Credential::Bearer {
            token: "tok".into(),
            configured_issuer: None,
        };
        assert_eq!(cred.issuer(), BEARER_SENTINEL_ISSUER);
        assert_eq!(cred.credential_type(), CredentialType::Bearer);
    }

    #[test]
    fn bearer_credential_honors_configured_issuer_override() {
        let cred = Credential::Bearer {
            token: "tok".into(),
            configured_issuer: Some("named-default".into()),
        };
        assert_eq!(cred.issuer(), "named-default");
    }

    #[test]
    fn anonymous_result_is_marked_anonymous() {
        let result = ValidationResult::anonymous("parsec.test", Utc::now());
        assert!(result.is_anonymous());
        assert!(result.is_temporally_valid());
    }

    #[test]
    fn temporal_invariant_rejects_expiry_before_issuance() {
        let now = Utc::now();
        let result = ValidationResult {
            subject: "alice".into(),
            issuer: "idp".into(),
            trust_domain: "parsec.test".into(),
            claims: Claims::new(),
            issued_at: now,
            expires_at: Some(now - chrono::Duration::seconds(1)),
            audience: vec![],
            scope: String::new(),
        };
        assert!(!result.is_temporally_valid());
    }
}
