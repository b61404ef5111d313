// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Key generation and sign-capable handles (C4, §3, §4.4).

use crate::error::ParsecError;
use crate::keys::jwk::{rsa_public_key_to_jwk_with_algorithm, PublicKey};
use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, EncodingKey};
use rsa::RsaPrivateKey;
use std::sync::Arc;

/// A sign-capable handle bound to one generated key.
///
/// `id` is the public `kid` exposed in JWT headers and JWKS — RFC 7638
/// thumbprint of the public key — and MUST be unique across all non-expired
/// keys (§3).
#[derive(Clone)]
pub struct Signer {
    pub id: String,
    pub algorithm: Algorithm,
    pub encoding_key: Arc<EncodingKey>,
    pub public_key: PublicKey,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .field("encoding_key", &"<EncodingKey>")
            .finish()
    }
}

/// Generates or retrieves signing material by `(namespace, keyName)` (C4).
///
/// Implementations MUST be idempotent for a given `(namespace, key_name)`
/// pair within the lifetime of one rotation: the rotation manager relies on
/// this to recover from a crash between generation and the slot-store write
/// that binds it (§4.4 two-phase commit).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Generates (or returns the already-generated) key material for
    /// `namespace:key_name`, bound to `algorithm`.
    async fn generate(
        &self,
        namespace: &str,
        key_name: &str,
        algorithm: Algorithm,
    ) -> Result<Signer, ParsecError>;
}

/// RSA-2048 [`KeyProvider`] backed by the `rsa` crate.
///
/// Keys are cached in memory by `(namespace, key_name)` so repeated calls
/// within a process return the same key material — the idempotency the
/// two-phase commit protocol depends on when a save fails after generation.
#[derive(Default)]
pub struct RsaKeyProvider {
    cache: DashMap<(String, String), Signer>,
}

impl RsaKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyProvider for RsaKeyProvider {
    async fn generate(
        &self,
        namespace: &str,
        key_name: &str,
        algorithm: Algorithm,
    ) -> Result<Signer, ParsecError> {
        let cache_key = (namespace.to_string(), key_name.to_string());
        if let Some(existing) = self.cache.get(&cache_key) {
            return Ok(existing.clone());
        }

        if !matches!(
            algorithm,
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512
        ) {
            return Err(ParsecError::Configuration(format!(
                "RsaKeyProvider cannot produce keys for algorithm {algorithm:?}"
            )));
        }

        let private_key = tokio::task::spawn_blocking(|| {
            let mut rng = rsa::rand_core::OsRng;
            RsaPrivateKey::new(&mut rng, 2048)
        })
        .await
        .map_err(|e| ParsecError::Internal(format!("key generation task panicked: {e}")))?
        .map_err(|e| ParsecError::Upstream(format!("RSA key generation failed: {e}")))?;

        let public_key = rsa::RsaPublicKey::from(&private_key);
        let jwk_public = rsa_public_key_to_jwk_with_algorithm(&public_key, algorithm)
            .map_err(|e| ParsecError::Internal(format!("failed to build JWK: {e}")))?;

        let private_pem = {
            use rsa::pkcs1::EncodeRsaPrivateKey;
            private_key
                .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
                .map_err(|e| ParsecError::Internal(format!("failed to encode private key: {e}")))?
        };

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| ParsecError::Internal(format!("failed to build encoding key: {e}")))?;

        let signer = Signer {
            id: jwk_public.kid.clone(),
            algorithm,
            encoding_key: Arc::new(encoding_key),
            public_key: jwk_public,
        };

        self.cache.insert(cache_key, signer.clone());
        Ok(signer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generate_is_idempotent_for_same_namespace_and_name() {
        let provider = RsaKeyProvider::new();
        let s1 = provider
            .generate("td:token", "key-a", Algorithm::RS256)
            .await
            .unwrap();
        let s2 = provider
            .generate("td:token", "key-a", Algorithm::RS256)
            .await
            .unwrap();
        assert_eq!(s1.id, s2.id);
    }

    #[tokio::test]
    async fn distinct_key_names_produce_distinct_keys() {
        let provider = RsaKeyProvider::new();
        let a = provider
            .generate("td:token", "key-a", Algorithm::RS256)
            .await
            .unwrap();
        let b = provider
            .generate("td:token", "key-b", Algorithm::RS256)
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn rejects_unsupported_algorithm() {
        let provider = RsaKeyProvider::new();
        let result = provider
            .generate("td:token", "key-a", Algorithm::HS256)
            .await;
        assert!(matches!(result, Err(ParsecError::Configuration(_))));
    }
}
