// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! TrustStore (C9): selects a validator by `(credential_type, issuer)` and
//! offers an actor-scoped filtered view (§4.1).

use crate::credential::{Credential, CredentialType, ValidationResult};
use crate::error::ParsecError;
use crate::validators::Validator;
use evalexpr::{ContextWithMutableVariables, DefaultNumericTypes, HashMapContext, Value as EvalValue};
use std::collections::HashSet;
use std::sync::Arc;

struct ValidatorEntry {
    credential_type: CredentialType,
    issuer: String,
    validator: Arc<dyn Validator>,
}

/// A pure, side-effect-free actor-filter predicate evaluated with
/// `evalexpr`. Bindings: `actor_subject`, `actor_issuer`,
/// `actor_trust_domain`, `actor_scope`, `validator_name` (§4.1).
pub struct ActorPolicy {
    expression: String,
}

impl ActorPolicy {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }

    fn evaluate(&self, actor: &ValidationResult, validator_name: &str) -> Result<bool, ParsecError> {
        let mut context = HashMapContext::<DefaultNumericTypes>::new();
        context
            .set_value("actor_subject".into(), EvalValue::String(actor.subject.clone()))
            .map_err(|e| ParsecError::Internal(e.to_string()))?;
        context
            .set_value("actor_issuer".into(), EvalValue::String(actor.issuer.clone()))
            .map_err(|e| ParsecError::Internal(e.to_string()))?;
        context
            .set_value(
                "actor_trust_domain".into(),
                EvalValue::String(actor.trust_domain.clone()),
            )
            .map_err(|e| ParsecError::Internal(e.to_string()))?;
        context
            .set_value("actor_scope".into(), EvalValue::String(actor.scope.clone()))
            .map_err(|e| ParsecError::Internal(e.to_string()))?;
        context
            .set_value(
                "validator_name".into(),
                EvalValue::String(validator_name.to_string()),
            )
            .map_err(|e| ParsecError::Internal(e.to_string()))?;

        evalexpr::eval_boolean_with_context(&self.expression, &context)
            .map_err(|e| ParsecError::Configuration(format!("actor filter predicate failed: {e}")))
    }
}

/// Polymorphic credential validator registry keyed by `(credential_type,
/// issuer)` (C9). `ForActor` does not copy validators — it filters the
/// enumeration by name over a shared, borrowed parent (§9 cyclic references).
pub struct TrustStore {
    entries: Arc<Vec<ValidatorEntry>>,
    policy: Option<Arc<ActorPolicy>>,
    allowed_names: Option<Arc<HashSet<String>>>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Vec::new()),
            policy: None,
            allowed_names: None,
        }
    }

    pub fn with_policy(policy: ActorPolicy) -> Self {
        Self {
            entries: Arc::new(Vec::new()),
            policy: Some(Arc::new(policy)),
            allowed_names: None,
        }
    }

    pub fn register(
        &mut self,
        credential_type: CredentialType,
        issuer: impl Into<String>,
        validator: Arc<dyn Validator>,
    ) {
        Arc::get_mut(&mut self.entries)
            .expect("TrustStore must be fully registered before being shared")
            .push(ValidatorEntry {
                credential_type,
                issuer: issuer.into(),
                validator,
            });
    }

    /// Returns a filtered view scoped to `actor`. If no policy is configured,
    /// returns the full store (§4.1).
    pub fn for_actor(&self, actor: &ValidationResult) -> Result<TrustStore, ParsecError> {
        let Some(policy) = &self.policy else {
            return Ok(TrustStore {
                entries: self.entries.clone(),
                policy: None,
                allowed_names: None,
            });
        };

        let mut allowed = HashSet::new();
        for entry in self.entries.iter() {
            if policy.evaluate(actor, entry.validator.name())? {
                allowed.insert(entry.validator.name().to_string());
            }
        }

        Ok(TrustStore {
            entries: self.entries.clone(),
            policy: Some(policy.clone()),
            allowed_names: Some(Arc::new(allowed)),
        })
    }

    fn is_allowed(&self, name: &str) -> bool {
        match &self.allowed_names {
            Some(allowed) => allowed.contains(name),
            None => true,
        }
    }

    pub async fn validate(&self, credential: &Credential) -> Result<ValidationResult, ParsecError> {
        let credential_type = credential.credential_type();
        let issuer = credential.issuer();

        let entry = self.entries.iter().find(|entry| {
            entry.credential_type == credential_type
                && entry.issuer == issuer
                && self.is_allowed(entry.validator.name())
        });

        match entry {
            Some(entry) => entry.validator.validate(credential).await,
            None => Err(ParsecError::NoValidator {
                credential_type: credential_type.as_str().to_string(),
                issuer: issuer.to_string(),
            }),
        }
    }
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::Claims;
    use crate::credential::BEARER_SENTINEL_ISSUER;
    use async_trait::async_trait;
    use chrono::Utc;

    struct StubValidator {
        name: String,
        subject: String,
    }

    #[async_trait]
    impl Validator for StubValidator {
        fn name(&self) -> &str {
            &self.name
        }

        fn credential_types(&self) -> &[CredentialType] {
            &[CredentialType::Bearer]
        }

        async fn validate(&self, _credential: &Credential) -> Result<ValidationResult, ParsecError> {
            Ok(ValidationResult {
                subject: self.subject.clone(),
                issuer: BEARER_SENTINEL_ISSUER.to_string(),
                trust_domain: "parsec.test".to_string(),
                claims: Claims::new(),
                issued_at: Utc::now(),
                expires_at: None,
                audience: vec![],
                scope: String::new(),
            })
        }
    }

    fn bearer(token: &str) -> Credential {
        Credential::Bearer {
            token: token.to_string(),
            configured_issuer: None,
        }
    }

    #[tokio::test]
    async fn dispatches_to_the_validator_registered_for_type_and_issuer() {
        let mut store = TrustStore::new();
        store.register(
            CredentialType::Bearer,
            BEARER_SENTINEL_ISSUER,
            Arc::new(StubValidator {
                name: "external-validator".into(),
                subject: "alice".into(),
            }),
        );

        let result = store.validate(&bearer("test-token-123")).await.unwrap();
        assert_eq!(result.subject, "alice");
    }

    #[tokio::test]
    async fn unregistered_issuer_yields_no_validator_error() {
        let store = TrustStore::new();
        let result = store.validate(&bearer("test-token-123")).await;
        assert!(matches!(result, Err(ParsecError::NoValidator { .. })));
    }

    #[tokio::test]
    async fn actor_filter_denies_anonymous_when_policy_requires_named_client() {
        let mut store = TrustStore::with_policy(ActorPolicy::new(
            "actor_trust_domain == \"client.example.com\" && validator_name == \"external-validator\"",
        ));
        store.register(
            CredentialType::Bearer,
            BEARER_SENTINEL_ISSUER,
            Arc::new(StubValidator {
                name: "external-validator".into(),
                subject: "alice".into(),
            }),
        );

        let anonymous = ValidationResult::anonymous("parsec.test", Utc::now());
        let filtered = store.for_actor(&anonymous).unwrap();
        let result = filtered.validate(&bearer("test-token-123")).await;
        assert!(matches!(result, Err(ParsecError::NoValidator { .. })));
    }

    #[tokio::test]
    async fn actor_filter_admits_matching_named_actor() {
        let mut store = TrustStore::with_policy(ActorPolicy::new(
            "actor_trust_domain == \"client.example.com\" && validator_name == \"external-validator\"",
        ));
        store.register(
            CredentialType::Bearer,
            BEARER_SENTINEL_ISSUER,
            Arc::new(StubValidator {
                name: "external-validator".into(),
                subject: "alice".into(),
            }),
        );

        let mut actor = ValidationResult::anonymous("client.example.com", Utc::now());
        actor.subject = "workload-1".to_string();
        let filtered = store.for_actor(&actor).unwrap();
        let result = filtered.validate(&bearer("test-token-123")).await.unwrap();
        assert_eq!(result.subject, "alice");
    }
}
