// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! JWK conversion and RFC 7638 thumbprint calculation.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, Jwk, KeyAlgorithm, PublicKeyUse, RSAKeyParameters,
    RSAKeyType,
};
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use serde_json::json;
use sha2::{Digest, Sha256};

/// A verification key as published via JWKS, carrying the `kid` this service
/// protects in signed JWS headers.
#[derive(Debug, Clone)]
pub struct PublicKey {
    pub kid: String,
    pub algorithm: jsonwebtoken::Algorithm,
    pub jwk: Jwk,
}

/// Computes the RFC 7638 thumbprint of an RSA JWK from its base64url-encoded
/// modulus and exponent. The thumbprint is used as the `kid`.
pub fn jwk_thumbprint(n_b64url: &str, e_b64url: &str) -> String {
    // Canonical member order per RFC 7638 §3.2: lexicographic by member name.
    let canonical = json!({
        "e": e_b64url,
        "kty": "RSA",
        "n": n_b64url,
    });
    let canonical_bytes = serde_json::to_vec(&canonical).expect("json map serializes");

    let mut hasher = Sha256::new();
    hasher.update(&canonical_bytes);
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Maps a [`jsonwebtoken::Algorithm`] to the JWK `alg` member for RSA keys.
/// Falls back to RS256 for non-RSA algorithms, which callers here never pass
/// (§4.4 algorithm migration only ever binds RSA algorithms to this provider).
fn jwk_key_algorithm(algorithm: jsonwebtoken::Algorithm) -> KeyAlgorithm {
    match algorithm {
        jsonwebtoken::Algorithm::RS384 => KeyAlgorithm::RS384,
        jsonwebtoken::Algorithm::RS512 => KeyAlgorithm::RS512,
        _ => KeyAlgorithm::RS256,
    }
}

/// Builds a [`PublicKey`] (JWK + `kid`) from an RSA public key, tagged with
/// the algorithm it is actually bound to sign with (§4.4 algorithm
/// migration: old slots keep their original algorithm until expiry).
///
/// `n` and `e` are base64url-encoded without padding, per RFC 7517 §6.3.1 —
/// unlike the plain base64 used elsewhere in this codebase for PEM blobs,
/// JWK member values are base64url.
pub fn rsa_public_key_to_jwk_with_algorithm(
    public_key: &RsaPublicKey,
    algorithm: jsonwebtoken::Algorithm,
) -> Result<PublicKey> {
    let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

    let kid = jwk_thumbprint(&n, &e);

    let jwk = Jwk {
        common: CommonParameters {
            public_key_use: Some(PublicKeyUse::Signature),
            key_id: Some(kid.clone()),
            key_algorithm: Some(jwk_key_algorithm(algorithm)),
            ..Default::default()
        },
        algorithm: AlgorithmParameters::RSA(RSAKeyParameters {
            key_type: RSAKeyType::RSA,
            n,
            e,
        }),
    };

    Ok(PublicKey { kid, algorithm, jwk })
}

/// [`rsa_public_key_to_jwk_with_algorithm`] defaulted to RS256, for callers
/// that only ever deal in the default algorithm (tests, the JWKS-fetch side
/// which always re-derives `alg` from the wire JWK instead).
pub fn rsa_public_key_to_jwk(public_key: &RsaPublicKey) -> Result<PublicKey> {
    rsa_public_key_to_jwk_with_algorithm(public_key, jsonwebtoken::Algorithm::RS256)
}

/// Decodes a PKCS#1 PEM-encoded RSA public key and converts it to a JWK.
pub fn rsa_pem_to_jwk(pem: &[u8]) -> Result<PublicKey> {
    use rsa::pkcs1::DecodeRsaPublicKey;
    let public_key = RsaPublicKey::from_pkcs1_pem(std::str::from_utf8(pem)?)
        .context("failed to parse RSA public key from PEM")?;
    rsa_public_key_to_jwk(&public_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;

    #[test]
    fn thumbprint_is_deterministic_for_same_key() {
        let mut rng = rsa::rand_core::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_key = RsaPublicKey::from(&private_key);

        let k1 = rsa_public_key_to_jwk(&public_key).unwrap();
        let k2 = rsa_public_key_to_jwk(&public_key).unwrap();
        assert_eq!(k1.kid, k2.kid);
    }

    #[test]
    fn different_keys_produce_different_thumbprints() {
        let mut rng = rsa::rand_core::OsRng;
        let k1 = RsaPublicKey::from(&RsaPrivateKey::new(&mut rng, 2048).unwrap());
        let k2 = RsaPublicKey::from(&RsaPrivateKey::new(&mut rng, 2048).unwrap());

        let p1 = rsa_public_key_to_jwk(&k1).unwrap();
        let p2 = rsa_public_key_to_jwk(&k2).unwrap();
        assert_ne!(p1.kid, p2.kid);
    }
}
