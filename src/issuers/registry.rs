// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! IssuerRegistry (C13): maps token-type URN to issuer (§2).

use crate::error::ParsecError;
use crate::issuers::Issuer;
use crate::keys::PublicKey;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct IssuerRegistry {
    issuers: HashMap<String, Arc<dyn Issuer>>,
}

impl IssuerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, issuer: Arc<dyn Issuer>) -> Result<(), ParsecError> {
        let token_type = issuer.token_type().to_string();
        if self.issuers.contains_key(&token_type) {
            return Err(ParsecError::Configuration(format!(
                "duplicate issuer registered for token type '{token_type}'"
            )));
        }
        self.issuers.insert(token_type, issuer);
        Ok(())
    }

    pub fn get(&self, token_type: &str) -> Option<Arc<dyn Issuer>> {
        self.issuers.get(token_type).cloned()
    }

    /// Union of every registered issuer's verification keys, for the JWKS
    /// publisher (C16, §6).
    pub fn all_public_keys(&self) -> Vec<PublicKey> {
        self.issuers.values().flat_map(|issuer| issuer.public_keys()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::Claims;
    use crate::credential::{IssueContext, Token};
    use async_trait::async_trait;

    struct DummyIssuer(&'static str);

    #[async_trait]
    impl Issuer for DummyIssuer {
        fn token_type(&self) -> &str {
            self.0
        }

        async fn issue(
            &self,
            _context: &IssueContext,
            _tctx: &Claims,
            _req_ctx: &Claims,
        ) -> Result<Token, ParsecError> {
            unimplemented!("not exercised in registry tests")
        }

        fn public_keys(&self) -> Vec<PublicKey> {
            Vec::new()
        }
    }

    #[test]
    fn duplicate_token_type_is_rejected() {
        let mut registry = IssuerRegistry::new();
        registry.register(Arc::new(DummyIssuer("urn:a"))).unwrap();
        let result = registry.register(Arc::new(DummyIssuer("urn:a")));
        assert!(matches!(result, Err(ParsecError::Configuration(_))));
    }

    #[test]
    fn unknown_token_type_is_none() {
        let registry = IssuerRegistry::new();
        assert!(registry.get("urn:unknown").is_none());
    }
}
