// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Token exchange (C15, §4.7): RFC 8693 over both `application/json` and
//! `application/x-www-form-urlencoded` bodies.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rocket::data::{self, Data, FromData, ToByteUnit};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{Request, State};
use serde::{Deserialize, Serialize};

use crate::claims_mapping::parse_proposed_request_context;
use crate::credential::{Credential, RequestAttributes, ValidationResult};
use crate::error::ParsecError;
use crate::token_service::IssueTokensRequest;

use super::AppState;

const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

const TOKEN_TYPE_JWT: &str = "urn:ietf:params:oauth:token-type:jwt";
const TOKEN_TYPE_ID_TOKEN: &str = "urn:ietf:params:oauth:token-type:id_token";
const TOKEN_TYPE_JSON: &str = "urn:parsec:token-type:json";

/// RFC 8693 §2.1 request parameters, shared by the JSON and form bodies.
#[derive(Debug, Deserialize)]
pub struct TokenExchangeRequest {
    grant_type: String,
    subject_token: String,
    subject_token_type: String,
    actor_token: Option<String>,
    actor_token_type: Option<String>,
    audience: Option<String>,
    #[serde(default)]
    scope: String,
    requested_token_type: Option<String>,
    request_context: Option<serde_json::Value>,
}

#[rocket::async_trait]
impl<'r> FromData<'r> for TokenExchangeRequest {
    type Error = anyhow::Error;

    async fn from_data(req: &'r Request<'_>, data: Data<'r>) -> data::Outcome<'r, Self> {
        let limit = req.limits().get("form").unwrap_or_else(|| 256.kibibytes());
        let bytes = match data.open(limit).into_bytes().await {
            Ok(bytes) if bytes.is_complete() => bytes.into_inner(),
            Ok(_) => {
                return data::Outcome::Error((
                    Status::PayloadTooLarge,
                    anyhow::anyhow!("token exchange request body exceeds the configured limit"),
                ))
            }
            Err(e) => return data::Outcome::Error((Status::InternalServerError, e.into())),
        };

        let is_form = req.content_type().map(|ct| ct.is_form()).unwrap_or(false);
        let parsed = if is_form {
            serde_urlencoded::from_bytes::<TokenExchangeRequest>(&bytes)
                .map_err(|e| anyhow::anyhow!("malformed form-encoded body: {e}"))
        } else {
            serde_json::from_slice::<TokenExchangeRequest>(&bytes)
                .map_err(|e| anyhow::anyhow!("malformed JSON body: {e}"))
        };

        match parsed {
            Ok(value) => data::Outcome::Success(value),
            Err(e) => data::Outcome::Error((Status::BadRequest, e)),
        }
    }
}

#[derive(Serialize)]
struct TokenExchangeResponse {
    access_token: String,
    issued_token_type: String,
    token_type: &'static str,
    expires_in: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    scope: String,
}

#[derive(Serialize)]
struct OAuthErrorResponse {
    error: &'static str,
    error_description: String,
}

fn error_response(err: &ParsecError) -> (Status, Json<OAuthErrorResponse>) {
    let status = match err.oauth_error_code() {
        "invalid_request" | "invalid_grant" => Status::BadRequest,
        "temporarily_unavailable" => Status::ServiceUnavailable,
        _ => Status::InternalServerError,
    };
    (
        status,
        Json(OAuthErrorResponse {
            error: err.oauth_error_code(),
            error_description: err.to_string(),
        }),
    )
}

/// Reads the unverified `iss` claim out of a compact JWS's payload segment,
/// purely to select a validator (§4.1) — the chosen validator re-verifies
/// the token's signature and claims from scratch.
fn peek_unverified_issuer(token: &str) -> Option<String> {
    let payload_b64 = token.split('.').nth(1)?;
    let payload_bytes = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&payload_bytes).ok()?;
    value.get("iss")?.as_str().map(str::to_string)
}

fn credential_for(token: String, token_type: &str) -> Credential {
    match token_type {
        TOKEN_TYPE_JWT => {
            let issuer = peek_unverified_issuer(&token).unwrap_or_default();
            Credential::Jwt { token, issuer }
        }
        TOKEN_TYPE_ID_TOKEN => {
            let issuer = peek_unverified_issuer(&token).unwrap_or_default();
            Credential::Oidc { token, issuer }
        }
        TOKEN_TYPE_JSON => Credential::Json {
            body: token.into_bytes(),
            issuer: "trusted-caller".to_string(),
        },
        // `urn:ietf:params:oauth:token-type:access_token` and any other URN
        // default to an opaque bearer.
        _ => Credential::Bearer {
            token,
            configured_issuer: None,
        },
    }
}

fn anonymous_actor(trust_domain: &str, now: chrono::DateTime<chrono::Utc>) -> ValidationResult {
    ValidationResult::anonymous(trust_domain, now)
}

#[rocket::post("/v1/token", data = "<body>")]
pub async fn exchange_token(
    body: TokenExchangeRequest,
    request: &Request<'_>,
    state: &State<AppState>,
) -> (Status, Json<serde_json::Value>) {
    if body.grant_type != GRANT_TYPE_TOKEN_EXCHANGE {
        let err = ParsecError::InvalidCredential(format!("unsupported grant_type '{}'", body.grant_type));
        let (status, response) = error_response(&err);
        return (status, Json(serde_json::to_value(response.into_inner()).unwrap()));
    }

    if let Some(audience) = &body.audience {
        if audience != &state.trust_domain {
            let err = ParsecError::InvalidCredential(format!(
                "audience '{audience}' does not match this service's trust domain"
            ));
            let (status, response) = error_response(&err);
            return (status, Json(serde_json::to_value(response.into_inner()).unwrap()));
        }
    }

    let now = chrono::Utc::now();

    let actor_result = if let (Some(actor_token), Some(actor_token_type)) =
        (&body.actor_token, &body.actor_token_type)
    {
        let credential = credential_for(actor_token.clone(), actor_token_type);
        match state.trust_store.validate(&credential).await {
            Ok(result) => Some(result),
            Err(err) => {
                let (status, response) = error_response(&err);
                return (status, Json(serde_json::to_value(response.into_inner()).unwrap()));
            }
        }
    } else {
        None
    };

    let actor_for_scoping = actor_result.clone().unwrap_or_else(|| anonymous_actor(&state.trust_domain, now));
    let scoped_store = match state.trust_store.for_actor(&actor_for_scoping) {
        Ok(store) => store,
        Err(err) => {
            let (status, response) = error_response(&err);
            return (status, Json(serde_json::to_value(response.into_inner()).unwrap()));
        }
    };

    let subject_credential = credential_for(body.subject_token.clone(), &body.subject_token_type);
    let subject_result = match scoped_store.validate(&subject_credential).await {
        Ok(result) => result,
        Err(err) => {
            let (status, response) = error_response(&err);
            return (status, Json(serde_json::to_value(response.into_inner()).unwrap()));
        }
    };

    let requested_token_types = vec![body
        .requested_token_type
        .clone()
        .unwrap_or_else(|| crate::issuers::TRANSACTION_TOKEN_TYPE.to_string())];

    let proposed_request_context = body
        .request_context
        .as_ref()
        .and_then(parse_proposed_request_context);

    let mut headers = BTreeMap::new();
    for header in request.headers().iter() {
        headers.insert(header.name().to_string(), header.value().to_string());
    }
    let request_attributes = RequestAttributes {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        ip_address: request.client_ip().map(|ip| ip.to_string()).unwrap_or_default(),
        user_agent: request
            .headers()
            .get_one("user-agent")
            .unwrap_or_default()
            .to_string(),
        headers,
        additional: BTreeMap::new(),
    };

    let issuance = IssueTokensRequest {
        subject: subject_result,
        actor: actor_result,
        request_attributes,
        requested_token_types,
        proposed_request_context,
    };

    match state.token_service.issue_tokens(issuance).await {
        Ok(mut tokens) => {
            let requested = issuance_requested_token_type(&body);
            let Some(token) = tokens.remove(&requested) else {
                let err = ParsecError::Internal(format!("issuer for '{requested}' produced no token"));
                let (status, response) = error_response(&err);
                return (status, Json(serde_json::to_value(response.into_inner()).unwrap()));
            };
            let expires_in = (token.expires_at - token.issued_at).num_seconds().max(0);
            let response = TokenExchangeResponse {
                access_token: token.value,
                issued_token_type: token.token_type,
                token_type: "Bearer",
                expires_in,
                scope: body.scope.clone(),
            };
            (Status::Ok, Json(serde_json::to_value(response).unwrap()))
        }
        Err(err) => {
            let (status, response) = error_response(&err);
            (status, Json(serde_json::to_value(response.into_inner()).unwrap()))
        }
    }
}

fn issuance_requested_token_type(body: &TokenExchangeRequest) -> String {
    body.requested_token_type
        .clone()
        .unwrap_or_else(|| crate::issuers::TRANSACTION_TOKEN_TYPE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peeks_issuer_from_an_unsigned_header_and_payload_pair() {
        let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"RS256\",\"typ\":\"JWT\"}");
        let payload = URL_SAFE_NO_PAD.encode(b"{\"iss\":\"https://idp.example.com\",\"sub\":\"alice\"}");
        let token = format!("{header}.{payload}.signature");
        assert_eq!(peek_unverified_issuer(&token), Some("https://idp.example.com".to_string()));
    }

    #[test]
    fn malformed_token_yields_no_issuer_rather_than_panicking() {
        assert_eq!(peek_unverified_issuer("not-a-jwt"), None);
        assert_eq!(peek_unverified_issuer(""), None);
    }

    #[test]
    fn unknown_token_type_maps_to_bearer_credential() {
        let credential = credential_for("opaque".to_string(), "urn:ietf:params:oauth:token-type:access_token");
        assert!(matches!(credential, Credential::Bearer { .. }));
    }
}
