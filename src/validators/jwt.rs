// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! JWT validator (C8) with a remote JWKS cache (§4.1). Accepts both `JWT`
//! and raw `Bearer` credentials: opaque bearer strings presented at the
//! external-authz surface are often JWTs in disguise.

use crate::claims::Claims;
use crate::clock::Clock;
use crate::credential::{Credential, CredentialType, ValidationResult};
use crate::error::ParsecError;
use crate::validators::Validator;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Leeway applied to `exp`/`nbf` comparisons (§7): clock skew is not an
/// error, it is absorbed up to this bound.
const CLOCK_SKEW_LEEWAY_SECONDS: u64 = 60;

/// Default minimum interval between forced JWKS refreshes on a cache miss,
/// preventing a burst of unknown `kid`s from hammering the JWKS endpoint.
const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Initial JWKS fetch timeout (§5).
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct VerificationKey {
    decoding_key: DecodingKey,
    algorithm: Algorithm,
}

struct JwksCache {
    keys: HashMap<String, VerificationKey>,
    fetched_at: DateTime<Utc>,
}

impl JwksCache {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            keys: HashMap::new(),
            fetched_at: now,
        }
    }
}

/// Minimal claim shape this validator reads off the wire before copying the
/// rest verbatim into [`ValidationResult::claims`].
#[derive(serde::Deserialize)]
struct StandardClaims {
    sub: String,
    iss: String,
    exp: i64,
    #[serde(default)]
    nbf: Option<i64>,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    aud: AudienceField,
    #[serde(default)]
    scope: String,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(serde::Deserialize, Default)]
#[serde(untagged)]
enum AudienceField {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl AudienceField {
    fn into_vec(self) -> Vec<String> {
        match self {
            AudienceField::None => Vec::new(),
            AudienceField::One(aud) => vec![aud],
            AudienceField::Many(auds) => auds,
        }
    }
}

/// Configured JWT validator: one expected issuer, one JWKS URL, one trust
/// domain (§4.1).
pub struct JwtValidator {
    name: String,
    expected_issuer: String,
    jwks_url: String,
    trust_domain: String,
    refresh_interval: Duration,
    min_refresh_interval: Duration,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
    cache: ArcSwap<JwksCache>,
}

impl JwtValidator {
    pub fn new(
        name: impl Into<String>,
        expected_issuer: impl Into<String>,
        jwks_url: impl Into<String>,
        trust_domain: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            expected_issuer: expected_issuer.into(),
            jwks_url: jwks_url.into(),
            trust_domain: trust_domain.into(),
            refresh_interval: Duration::from_secs(15 * 60),
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            http: reqwest::Client::new(),
            clock,
            cache: ArcSwap::from_pointee(JwksCache::empty(now)),
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    async fn refresh_jwks(&self) -> Result<(), ParsecError> {
        let response = tokio::time::timeout(JWKS_FETCH_TIMEOUT, self.http.get(&self.jwks_url).send())
            .await
            .map_err(|_| ParsecError::Upstream(format!("JWKS fetch from {} timed out", self.jwks_url)))?
            .map_err(|e| ParsecError::Upstream(format!("JWKS fetch failed: {e}")))?;

        let jwk_set: jsonwebtoken::jwk::JwkSet = response
            .json()
            .await
            .map_err(|e| ParsecError::Upstream(format!("malformed JWKS response: {e}")))?;

        let mut keys = HashMap::new();
        for jwk in jwk_set.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                continue;
            };
            let Ok(decoding_key) = DecodingKey::from_jwk(&jwk) else {
                continue;
            };
            let algorithm = key_algorithm_to_algorithm(jwk.common.key_algorithm).unwrap_or(Algorithm::RS256);
            keys.insert(kid, VerificationKey { decoding_key, algorithm });
        }

        self.cache.store(Arc::new(JwksCache {
            keys,
            fetched_at: self.clock.now(),
        }));
        Ok(())
    }

    async fn resolve_key(&self, kid: &str) -> Result<VerificationKey, ParsecError> {
        {
            let cache = self.cache.load();
            if let Some(key) = cache.keys.get(kid) {
                return Ok(key.clone());
            }
        }

        let should_refresh = {
            let cache = self.cache.load();
            let age = self.clock.now().signed_duration_since(cache.fetched_at);
            age.to_std().unwrap_or(Duration::MAX) >= self.min_refresh_interval
        };

        if should_refresh {
            self.refresh_jwks().await?;
        }

        let cache = self.cache.load();
        cache
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| ParsecError::InvalidToken(format!("unknown key id '{kid}'")))
    }
}

fn key_algorithm_to_algorithm(alg: Option<jsonwebtoken::jwk::KeyAlgorithm>) -> Option<Algorithm> {
    use jsonwebtoken::jwk::KeyAlgorithm as Ka;
    match alg? {
        Ka::RS256 => Some(Algorithm::RS256),
        Ka::RS384 => Some(Algorithm::RS384),
        Ka::RS512 => Some(Algorithm::RS512),
        Ka::ES256 => Some(Algorithm::ES256),
        Ka::ES384 => Some(Algorithm::ES384),
        Ka::HS256 => Some(Algorithm::HS256),
        Ka::HS384 => Some(Algorithm::HS384),
        Ka::HS512 => Some(Algorithm::HS512),
        _ => None,
    }
}

#[async_trait]
impl Validator for JwtValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn credential_types(&self) -> &[CredentialType] {
        &[CredentialType::Jwt, CredentialType::Bearer, CredentialType::Oidc]
    }

    async fn validate(&self, credential: &Credential) -> Result<ValidationResult, ParsecError> {
        let token = match credential {
            Credential::Jwt { token, .. } | Credential::Oidc { token, .. } => token,
            Credential::Bearer { token, .. } => token,
            _ => {
                return Err(ParsecError::InvalidCredential(
                    "JWT validator received a credential it cannot parse".to_string(),
                ))
            }
        };

        let header = decode_header(token)
            .map_err(|e| ParsecError::InvalidToken(format!("malformed JWS header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| ParsecError::InvalidToken("JWS header is missing 'kid'".to_string()))?;

        let key = self.resolve_key(&kid).await?;

        // The key's own algorithm is authoritative; the JOSE header is never
        // trusted alone for algorithm selection (§4.1).
        let mut validation = Validation::new(key.algorithm);
        // `exp`/`nbf` are checked by hand below against the injected clock
        // instead of jsonwebtoken's internal wall-clock `SystemTime::now()`,
        // so tests (and skewed deployments) can drive them deterministically.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_issuer(&[&self.expected_issuer]);
        // Audience validation is an open question left optional (§9); `iss`
        // and `exp` are enforced unconditionally via `required_spec_claims`.
        validation.validate_aud = false;
        validation.required_spec_claims = ["sub", "exp", "iss"].into_iter().map(String::from).collect();

        let token_data = decode::<StandardClaims>(token, &key.decoding_key, &validation)
            .map_err(|e| ParsecError::InvalidToken(format!("JWT validation failed: {e}")))?;

        let claims = token_data.claims;
        if claims.sub.is_empty() {
            return Err(ParsecError::InvalidToken("JWT is missing 'sub'".to_string()));
        }

        let now = self.clock.now();
        let leeway = chrono::Duration::seconds(CLOCK_SKEW_LEEWAY_SECONDS as i64);
        let exp = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| ParsecError::InvalidToken("JWT 'exp' is out of range".to_string()))?;
        if now - leeway >= exp {
            return Err(ParsecError::ExpiredToken);
        }
        if let Some(nbf) = claims.nbf {
            let nbf = Utc
                .timestamp_opt(nbf, 0)
                .single()
                .ok_or_else(|| ParsecError::InvalidToken("JWT 'nbf' is out of range".to_string()))?;
            if now + leeway < nbf {
                return Err(ParsecError::InvalidToken("JWT is not yet valid ('nbf')".to_string()));
            }
        }

        let issued_at = claims
            .iat
            .and_then(|iat| Utc.timestamp_opt(iat, 0).single())
            .unwrap_or_else(|| self.clock.now());
        let expires_at = Utc.timestamp_opt(claims.exp, 0).single();

        let mut result_claims = Claims::new();
        for (key, value) in claims.rest {
            if matches!(key.as_str(), "sub" | "iss" | "exp" | "nbf" | "iat" | "aud" | "scope") {
                continue;
            }
            result_claims.insert(key, value);
        }

        Ok(ValidationResult {
            subject: claims.sub,
            issuer: claims.iss,
            trust_domain: self.trust_domain.clone(),
            claims: result_claims,
            issued_at,
            expires_at,
            audience: claims.aud.into_vec(),
            scope: claims.scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generate_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let mut rng = rsa::rand_core::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        (private_key, public_key)
    }

    fn jwks_body(kid: &str, public_key: &RsaPublicKey) -> serde_json::Value {
        let public_key = crate::keys::rsa_public_key_to_jwk(public_key).unwrap();
        let mut jwk_json = serde_json::to_value(&public_key.jwk).unwrap();
        jwk_json["kid"] = serde_json::json!(kid);
        serde_json::json!({ "keys": [jwk_json] })
    }

    fn sign_token(private_key: &RsaPrivateKey, kid: &str, claims: &serde_json::Value) -> String {
        let pem = private_key.to_pkcs1_pem(rsa::pkcs1::LineEnding::LF).unwrap();
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        encode(&header, claims, &encoding_key).unwrap()
    }

    #[tokio::test]
    async fn validates_a_well_formed_token_against_live_jwks() {
        let (private_key, public_key) = generate_keypair();
        let kid = "test-kid";

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(kid, &public_key)))
            .mount(&server)
            .await;

        let now = Utc::now();
        let claims = serde_json::json!({
            "sub": "alice",
            "iss": "https://idp.example.com",
            "exp": (now + chrono::Duration::hours(1)).timestamp(),
            "iat": now.timestamp(),
            "scope": "read write",
            "department": "engineering",
        });
        let token = sign_token(&private_key, kid, &claims);

        let clock = Arc::new(TestClock::new(now));
        let validator = JwtValidator::new(
            "idp",
            "https://idp.example.com",
            format!("{}/jwks.json", server.uri()),
            "parsec.test",
            clock,
        );

        let credential = Credential::Jwt {
            token,
            issuer: "https://idp.example.com".to_string(),
        };
        let result = validator.validate(&credential).await.unwrap();
        assert_eq!(result.subject, "alice");
        assert_eq!(result.trust_domain, "parsec.test");
        assert_eq!(result.scope, "read write");
        assert_eq!(
            result.claims.get("department"),
            Some(&serde_json::json!("engineering"))
        );
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let (private_key, public_key) = generate_keypair();
        let kid = "test-kid";

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(kid, &public_key)))
            .mount(&server)
            .await;

        // Token is minted as valid at issuance time; the clock is then
        // advanced well past `exp` and the leeway window, so this exercises
        // the injected `Clock` rather than real wall-clock skew.
        let issued_at = Utc::now();
        let claims = serde_json::json!({
            "sub": "alice",
            "iss": "https://idp.example.com",
            "exp": (issued_at + chrono::Duration::minutes(5)).timestamp(),
            "iat": issued_at.timestamp(),
        });
        let token = sign_token(&private_key, kid, &claims);

        let clock = Arc::new(TestClock::new(issued_at));
        let validator = JwtValidator::new(
            "idp",
            "https://idp.example.com",
            format!("{}/jwks.json", server.uri()),
            "parsec.test",
            clock.clone(),
        );

        let credential = Credential::Jwt {
            token,
            issuer: "https://idp.example.com".to_string(),
        };
        // Before the clock advances past `exp`, the token is still valid.
        assert!(validator.validate(&credential).await.is_ok());

        clock.set(issued_at + chrono::Duration::hours(2));
        let result = validator.validate(&credential).await;
        assert!(matches!(result, Err(ParsecError::ExpiredToken)));
    }

    #[tokio::test]
    async fn rejects_not_yet_valid_token() {
        let (private_key, public_key) = generate_keypair();
        let kid = "test-kid";

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(kid, &public_key)))
            .mount(&server)
            .await;

        let now = Utc::now();
        let claims = serde_json::json!({
            "sub": "alice",
            "iss": "https://idp.example.com",
            "exp": (now + chrono::Duration::hours(1)).timestamp(),
            "nbf": (now + chrono::Duration::minutes(30)).timestamp(),
        });
        let token = sign_token(&private_key, kid, &claims);

        let clock = Arc::new(TestClock::new(now));
        let validator = JwtValidator::new(
            "idp",
            "https://idp.example.com",
            format!("{}/jwks.json", server.uri()),
            "parsec.test",
            clock,
        );

        let credential = Credential::Jwt {
            token,
            issuer: "https://idp.example.com".to_string(),
        };
        let result = validator.validate(&credential).await;
        assert!(matches!(result, Err(ParsecError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn rejects_wrong_issuer() {
        let (private_key, public_key) = generate_keypair();
        let kid = "test-kid";

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(kid, &public_key)))
            .mount(&server)
            .await;

        let now = Utc::now();
        let claims = serde_json::json!({
            "sub": "alice",
            "iss": "https://attacker.example.com",
            "exp": (now + chrono::Duration::hours(1)).timestamp(),
        });
        let token = sign_token(&private_key, kid, &claims);

        let clock = Arc::new(TestClock::new(now));
        let validator = JwtValidator::new(
            "idp",
            "https://idp.example.com",
            format!("{}/jwks.json", server.uri()),
            "parsec.test",
            clock,
        );

        let credential = Credential::Jwt {
            token,
            issuer: "https://attacker.example.com".to_string(),
        };
        let result = validator.validate(&credential).await;
        assert!(matches!(result, Err(ParsecError::InvalidToken(_))));
    }
}
