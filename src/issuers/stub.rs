// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Stub issuer (§4.5): deterministic string format for tests, embedding the
//! subject and a monotonic counter rather than signing anything.

use crate::claims::Claims;
use crate::clock::Clock;
use crate::credential::{IssueContext, Token};
use crate::error::ParsecError;
use crate::issuers::Issuer;
use crate::keys::PublicKey;
use async_trait::async_trait;
use chrono::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct StubIssuer {
    token_type: String,
    clock: Arc<dyn Clock>,
    counter: AtomicU64,
    ttl: Duration,
}

impl StubIssuer {
    pub fn new(token_type: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            token_type: token_type.into(),
            clock,
            counter: AtomicU64::new(0),
            ttl: Duration::minutes(5),
        }
    }
}

#[async_trait]
impl Issuer for StubIssuer {
    fn token_type(&self) -> &str {
        &self.token_type
    }

    async fn issue(
        &self,
        context: &IssueContext,
        _tctx: &Claims,
        _req_ctx: &Claims,
    ) -> Result<Token, ParsecError> {
        let sequence = self.counter.fetch_add(1, Ordering::SeqCst);
        let now = self.clock.now();
        Ok(Token {
            value: format!("stub-token:{}:{}", context.subject.subject, sequence),
            token_type: self.token_type.clone(),
            issued_at: now,
            expires_at: now + self.ttl,
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
    async fn counter_advances_monotonically_per_issuer_instance() {
        let now = Utc::now();
        let clock: Arc<dyn Clock> = Arc::new(TestClock::new(now));
        let issuer = StubIssuer::new("urn:parsec:token-type:stub", clock.clone());

        let subject = ValidationResult::anonymous("parsec.test", now);
        let context = IssueContext {
            subject,
            actor: None,
            request_attributes: RequestAttributes::default(),
            data_source_registry: Arc::new(DataSourceRegistry::new(clock.clone())),
            audience: vec!["parsec.test".to_string()],
            scope: String::new(),
        };

        let first = issuer
            .issue(&context, &Claims::new(), &Claims::new())
            .await
            .unwrap();
        let second = issuer
            .issue(&context, &Claims::new(), &Claims::new())
            .await
            .unwrap();
        assert_eq!(first.value, "stub-token:anonymous:0");
        assert_eq!(second.value, "stub-token:anonymous:1");
    }
}
