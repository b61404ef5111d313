// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Signing transaction-token issuer (§4.5): a compact JWS per
//! draft-ietf-oauth-transaction-tokens, signed via the rotating key manager.

use crate::claims::Claims;
use crate::clock::Clock;
use crate::credential::{IssueContext, Token};
use crate::error::ParsecError;
use crate::issuers::{Issuer, TRANSACTION_TOKEN_TYPE};
use crate::keys::{PublicKey, RotatingKeyManager};
use async_trait::async_trait;
use chrono::Duration;
use jsonwebtoken::{encode, Header};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Signs transaction tokens via a [`RotatingKeyManager`] (C5). `ttl` governs
/// `exp = iat + ttl`; defaults to 5 minutes — short-lived per §1.
pub struct SigningTransactionTokenIssuer {
    key_manager: Arc<RotatingKeyManager>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SigningTransactionTokenIssuer {
    pub fn new(key_manager: Arc<RotatingKeyManager>, clock: Arc<dyn Clock>) -> Self {
        Self {
            key_manager,
            clock,
            ttl: Duration::minutes(5),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl Issuer for SigningTransactionTokenIssuer {
    fn token_type(&self) -> &str {
        TRANSACTION_TOKEN_TYPE
    }

    async fn issue(
        &self,
        context: &IssueContext,
        tctx: &Claims,
        req_ctx: &Claims,
    ) -> Result<Token, ParsecError> {
        let signer = self.key_manager.get_current_signer();
        let now = self.clock.now();
        let expires_at = now + self.ttl;

        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(context.trust_domain_audience()));
        claims.insert("sub".to_string(), json!(context.subject.subject));
        claims.insert(
            "aud".to_string(),
            Value::Array(context.audience.iter().map(|a| json!(a)).collect()),
        );
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert("nbf".to_string(), json!(now.timestamp()));
        claims.insert("exp".to_string(), json!(expires_at.timestamp()));
        claims.insert("jti".to_string(), json!(Uuid::new_v4().to_string()));
        claims.insert("txn".to_string(), json!(Uuid::now_v7().to_string()));

        if !tctx.is_empty() {
            claims.insert("tctx".to_string(), tctx.clone().into_json_value());
        }
        if !req_ctx.is_empty() {
            claims.insert("req_ctx".to_string(), req_ctx.clone().into_json_value());
        }
        if !context.scope.is_empty() {
            claims.insert("scope".to_string(), json!(context.scope));
        }

        let mut header = Header::new(signer.algorithm);
        header.kid = Some(signer.id.clone());

        let value = encode(&header, &Value::Object(claims), &signer.encoding_key)
            .map_err(|e| ParsecError::Internal(format!("failed to sign transaction token: {e}")))?;

        Ok(Token {
            value,
            token_type: TRANSACTION_TOKEN_TYPE.to_string(),
            issued_at: now,
            expires_at,
        })
    }

    fn public_keys(&self) -> Vec<PublicKey> {
        self.key_manager.public_keys()
    }
}

/// The token service always sets `audience = trust_domain` (§4.6); this
/// extracts the single audience entry issuers sign `iss` as, matching the
/// convention that the issuer identifies itself as its own trust domain.
trait IssueContextExt {
    fn trust_domain_audience(&self) -> String;
}

impl IssueContextExt for IssueContext {
    fn trust_domain_audience(&self) -> String {
        self.audience
            .first()
            .cloned()
            .unwrap_or_else(|| self.subject.trust_domain.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::credential::{RequestAttributes, ValidationResult};
    use crate::datasource::DataSourceRegistry;
    use crate::keys::slot::InMemoryKeySlotStore;
    use crate::keys::{RotationParams, RsaKeyProvider};
    use chrono::Utc;
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    async fn build_manager(clock: Arc<dyn Clock>) -> Arc<RotatingKeyManager> {
        let store = Arc::new(InMemoryKeySlotStore::new());
        let provider = Arc::new(RsaKeyProvider::new());
        Arc::new(
            RotatingKeyManager::new(
                TRANSACTION_TOKEN_TYPE,
                "parsec.test",
                Algorithm::RS256,
                RotationParams::default(),
                store,
                provider,
                clock,
            )
            .await
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn issues_a_verifiable_token_with_the_trust_domain_audience() {
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(now));
        let manager = build_manager(clock.clone()).await;
        let issuer = SigningTransactionTokenIssuer::new(manager.clone(), clock.clone());

        let subject = ValidationResult::anonymous("parsec.test", now);
        let context = IssueContext {
            subject: subject.clone(),
            actor: None,
            request_attributes: RequestAttributes::default(),
            data_source_registry: Arc::new(DataSourceRegistry::new(clock.clone())),
            audience: vec!["parsec.test".to_string()],
            scope: "read".to_string(),
        };

        let mut tctx = Claims::new();
        tctx.insert("role", "viewer");

        let token = issuer
            .issue(&context, &tctx, &Claims::new())
            .await
            .unwrap();
        assert_eq!(token.token_type, TRANSACTION_TOKEN_TYPE);
        assert!(token.expires_at > token.issued_at);

        let signer = manager.get_current_signer();
        let decoding_key =
            DecodingKey::from_jwk(&signer.public_key.jwk).expect("valid verification key");
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        let decoded: serde_json::Value =
            decode(&token.value, &decoding_key, &validation).unwrap().claims;
        assert_eq!(decoded["sub"], "anonymous");
        assert_eq!(decoded["aud"], json!(["parsec.test"]));
        assert_eq!(decoded["tctx"]["role"], "viewer");
    }
}
