// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Unsigned token issuer (§4.5): base64-encoded JSON of the transaction
//! context claims only, with a far-future sentinel expiry.

use crate::claims::Claims;
use crate::clock::Clock;
use crate::credential::{IssueContext, Token};
use crate::error::ParsecError;
use crate::issuers::Issuer;
use crate::keys::PublicKey;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{TimeZone, Utc};
use std::sync::Arc;

/// Default URN for the unsigned token type, used when configuration doesn't
/// name one explicitly.
pub const UNSIGNED_TOKEN_TYPE: &str = "urn:parsec:token-type:unsigned";

/// Sentinel far-future expiry for unsigned tokens (§4.5): year 9999.
fn sentinel_expiry() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).single().expect("valid sentinel date")
}

/// One instance per configured token type (§2 `unsigned_token_types`) — the
/// URN is a constructor argument rather than a constant so a deployment can
/// serve several distinct unsigned token types side by side.
pub struct UnsignedTokenIssuer {
    token_type: String,
    clock: Arc<dyn Clock>,
}

impl UnsignedTokenIssuer {
    pub fn new(token_type: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            token_type: token_type.into(),
            clock,
        }
    }
}

#[async_trait]
impl Issuer for UnsignedTokenIssuer {
    fn token_type(&self) -> &str {
        &self.token_type
    }

    async fn issue(
        &self,
        _context: &IssueContext,
        tctx: &Claims,
        _req_ctx: &Claims,
    ) -> Result<Token, ParsecError> {
        let body = tctx.clone().into_json_value();
        let bytes = serde_json::to_vec(&body)
            .map_err(|e| ParsecError::Internal(format!("failed to serialize tctx: {e}")))?;
        let value = STANDARD.encode(bytes);

        Ok(Token {
            value,
            token_type: self.token_type.clone(),
            issued_at: self.clock.now(),
            expires_at: sentinel_expiry(),
        })
    }

    fn public_keys(&self) -> Vec<PublicKey> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::credential::{RequestAttributes, ValidationResult};
    use crate::datasource::DataSourceRegistry;
    use chrono::Utc;

    #[tokio::test]
    async fn encodes_only_tctx_claims_with_sentinel_expiry() {
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(now));
        let issuer = UnsignedTokenIssuer::new(UNSIGNED_TOKEN_TYPE, clock.clone());

        let subject = ValidationResult::anonymous("parsec.test", now);
        let context = IssueContext {
            subject,
            actor: None,
            request_attributes: RequestAttributes::default(),
            data_source_registry: Arc::new(DataSourceRegistry::new(clock.clone())),
            audience: vec!["parsec.test".to_string()],
            scope: String::new(),
        };

        let mut tctx = Claims::new();
        tctx.insert("role", "viewer");
        let mut req_ctx = Claims::new();
        req_ctx.insert("ignored", "should-not-appear");

        let token = issuer.issue(&context, &tctx, &req_ctx).await.unwrap();
        assert_eq!(token.expires_at.format("%Y").to_string(), "9999");

        let decoded = STANDARD.decode(&token.value).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["role"], "viewer");
        assert!(value.get("ignored").is_none());
    }
}
