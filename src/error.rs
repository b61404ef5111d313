// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Error kinds shared across the validation, issuance, and key-rotation planes.
//!
//! Variants correspond to the error kinds a caller can observe, not to the
//! implementation that raised them: a validator, an issuer, and the token
//! service all surface the same `ParsecError` so handlers can map it to a
//! transport-specific response without knowing which component failed.

use thiserror::Error;

/// Error raised anywhere in the credential-validation / token-issuance pipeline.
#[derive(Error, Debug)]
pub enum ParsecError {
    /// Malformed credential, missing required field, or unsupported scheme.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// Signature or structural claim validation failed at a validator.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The credential's `exp` claim is in the past.
    #[error("token expired")]
    ExpiredToken,

    /// No validator is configured for `(credential_type, issuer)`, possibly
    /// after actor-based filtering removed the only match.
    #[error("no validator for credential type {credential_type:?} and issuer '{issuer}'")]
    NoValidator {
        credential_type: String,
        issuer: String,
    },

    /// A JWKS fetch, data-source fetch, or key-provider call failed.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// CAS mismatch on a key-slot write. Never surfaced to external callers;
    /// the rotation loop treats this as "another process is handling it".
    #[error("rotation contested (version mismatch)")]
    RotationContested,

    /// Slot parameters violate invariants, duplicate cache group names, or
    /// an unknown content type was configured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An issuer or internal invariant failed unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ParsecError {
    /// Maps this error to the OAuth 2.0 token-exchange error code (RFC 6749 §5.2)
    /// that the token-exchange handler should return in the response body.
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            ParsecError::InvalidCredential(_) => "invalid_request",
            ParsecError::InvalidToken(_) | ParsecError::ExpiredToken => "invalid_grant",
            ParsecError::NoValidator { .. } => "invalid_grant",
            ParsecError::Upstream(_) => "temporarily_unavailable",
            ParsecError::RotationContested => "temporarily_unavailable",
            ParsecError::Configuration(_) | ParsecError::Internal(_) => "server_error",
        }
    }

    /// True when this error should be reported to the external-authz caller
    /// as Unauthenticated rather than Internal.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            ParsecError::InvalidCredential(_)
                | ParsecError::InvalidToken(_)
                | ParsecError::ExpiredToken
                | ParsecError::NoValidator { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_failures_map_to_invalid_grant_or_request() {
        assert_eq!(
            ParsecError::InvalidCredential("missing bearer".into()).oauth_error_code(),
            "invalid_request"
        );
        assert_eq!(ParsecError::ExpiredToken.oauth_error_code(), "invalid_grant");
        assert!(ParsecError::ExpiredToken.is_authentication_failure());
    }

    #[test]
    fn internal_errors_are_not_authentication_failures() {
        let err = ParsecError::Internal("unreachable invariant".into());
        assert!(!err.is_authentication_failure());
        assert_eq!(err.oauth_error_code(), "server_error");
    }

    #[test]
    fn rotation_contested_never_reaches_the_caller_as_auth_failure() {
        assert!(!ParsecError::RotationContested.is_authentication_failure());
    }
}
