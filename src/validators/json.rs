// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! JSON validator (C8): for test and trusted-caller paths, parses bytes as a
//! [`ValidationResult`] directly rather than verifying a signature (§4.1).

use crate::claims_mapping::ClaimsFilter;
use crate::credential::{Credential, CredentialType, ValidationResult};
use crate::error::ParsecError;
use crate::validators::Validator;
use async_trait::async_trait;

/// Parses a JSON-encoded [`ValidationResult`] and applies a claims filter to
/// its `claims` map. Rejects a configured trust-domain mismatch.
pub struct JsonValidator {
    name: String,
    expected_trust_domain: Option<String>,
    claims_filter: ClaimsFilter,
}

impl JsonValidator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expected_trust_domain: None,
            claims_filter: ClaimsFilter::Passthrough,
        }
    }

    pub fn with_expected_trust_domain(mut self, trust_domain: impl Into<String>) -> Self {
        self.expected_trust_domain = Some(trust_domain.into());
        self
    }

    pub fn with_claims_filter(mut self, filter: ClaimsFilter) -> Self {
        self.claims_filter = filter;
        self
    }
}

#[async_trait]
impl Validator for JsonValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn credential_types(&self) -> &[CredentialType] {
        &[CredentialType::Json]
    }

    async fn validate(&self, credential: &Credential) -> Result<ValidationResult, ParsecError> {
        let Credential::Json { body, .. } = credential else {
            return Err(ParsecError::InvalidCredential(
                "JSON validator received a non-JSON credential".to_string(),
            ));
        };

        let mut result: ValidationResult = serde_json::from_slice(body)
            .map_err(|e| ParsecError::InvalidToken(format!("malformed JSON credential: {e}")))?;

        if result.subject.is_empty() {
            return Err(ParsecError::InvalidToken(
                "JSON credential is missing a subject".to_string(),
            ));
        }

        if let Some(expected) = &self.expected_trust_domain {
            if &result.trust_domain != expected {
                return Err(ParsecError::InvalidToken(format!(
                    "trust domain mismatch: expected '{expected}', got '{}'",
                    result.trust_domain
                )));
            }
        }

        if !result.is_temporally_valid() {
            return Err(ParsecError::InvalidToken(
                "expires_at is not strictly after issued_at".to_string(),
            ));
        }

        result.claims = self.claims_filter.apply(&result.claims);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::Claims;
    use chrono::Utc;

    fn sample_result() -> ValidationResult {
        let mut claims = Claims::new();
        claims.insert("role", "admin");
        ValidationResult {
            subject: "alice".into(),
            issuer: "trusted-caller".into(),
            trust_domain: "parsec.test".into(),
            claims,
            issued_at: Utc::now(),
            expires_at: None,
            audience: vec![],
            scope: String::new(),
        }
    }

    fn credential_for(result: &ValidationResult) -> Credential {
        Credential::Json {
            body: serde_json::to_vec(result).unwrap(),
            issuer: "trusted-caller".to_string(),
        }
    }

    #[tokio::test]
    async fn round_trips_through_serialization_and_filter() {
        let validator = JsonValidator::new("json").with_claims_filter(ClaimsFilter::Passthrough);
        let original = sample_result();
        let credential = credential_for(&original);

        let validated = validator.validate(&credential).await.unwrap();
        assert_eq!(validated.subject, original.subject);
        assert_eq!(validated.claims.get("role"), original.claims.get("role"));
    }

    #[tokio::test]
    async fn rejects_trust_domain_mismatch() {
        let validator = JsonValidator::new("json").with_expected_trust_domain("other.test");
        let credential = credential_for(&sample_result());
        let result = validator.validate(&credential).await;
        assert!(matches!(result, Err(ParsecError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn allow_list_drops_unlisted_claims() {
        let validator =
            JsonValidator::new("json").with_claims_filter(ClaimsFilter::allow(Vec::<String>::new()));
        let credential = credential_for(&sample_result());
        let validated = validator.validate(&credential).await.unwrap();
        assert!(validated.claims.get("role").is_none());
    }
}
