// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! External-authorization hook (C15, §4.7): the request surface a reverse
//! proxy calls on every request. Shaped after Envoy's `ext_authz.v3` check
//! request/response so the same attribute names (`request.http`, `source`,
//! `context_extensions`) work whether the proxy speaks gRPC elsewhere and
//! HTTP here, or HTTP-only end to end.
//!
//! On success the original credential header is stripped and the minted
//! token is returned in a configured response header; on any failure no
//! token material leaks and the credential header is left in place so the
//! proxy can produce a meaningful error for the client (§7 side-channel
//! discipline).

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rocket::serde::json::Json;
use rocket::State;
use serde::{Deserialize, Serialize};

use crate::credential::{Credential, RequestAttributes};
use crate::error::ParsecError;
use crate::token_service::IssueTokensRequest;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct HttpAttributes {
    #[serde(default)]
    method: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    host: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct SocketAddress {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct Address {
    #[serde(rename = "socketAddress", default)]
    socket_address: Option<SocketAddress>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Source {
    #[serde(default)]
    address: Option<Address>,
}

#[derive(Debug, Deserialize)]
pub struct RequestInner {
    http: HttpAttributes,
}

#[derive(Debug, Deserialize)]
pub struct CheckAttributes {
    request: RequestInner,
    #[serde(default)]
    source: Source,
    #[serde(rename = "contextExtensions", default)]
    context_extensions: BTreeMap<String, String>,
}

/// Envoy `ext_authz.v3.CheckRequest`, carried over JSON instead of gRPC (§6).
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    attributes: CheckAttributes,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Ok,
    Denied,
}

/// Envoy-shaped `CheckResponse`: additive response headers plus a removal
/// list on success, or a status code and body on denial. Never both.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    status: CheckStatus,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    headers_to_remove: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

impl CheckResponse {
    fn denied(code: u16, body: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Denied,
            headers: BTreeMap::new(),
            headers_to_remove: Vec::new(),
            code: Some(code),
            body: Some(body.into()),
        }
    }
}

fn credential_header_value<'a>(headers: &'a BTreeMap<String, String>, header_name: &str) -> Option<&'a str> {
    let lower = header_name.to_ascii_lowercase();
    headers
        .iter()
        .find(|(name, _)| name.to_ascii_lowercase() == lower)
        .map(|(_, value)| value.as_str())
}

/// Extracts a bearer-scheme credential from the configured credential
/// header. Extensibility for other schemes (mTLS, basic) is noted in §4.7
/// but only the Bearer scheme is implemented today.
fn extract_credential(headers: &BTreeMap<String, String>, header_name: &str) -> Result<Credential, ParsecError> {
    let value = credential_header_value(headers, header_name)
        .ok_or_else(|| ParsecError::InvalidCredential(format!("missing '{header_name}' header")))?;

    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or_else(|| ParsecError::InvalidCredential("unsupported authorization scheme".to_string()))?
        .trim();

    if token.is_empty() {
        return Err(ParsecError::InvalidCredential("empty bearer token".to_string()));
    }

    // A bearer-scheme token is opaque unless it looks like a JWT (three
    // dot-separated segments), in which case the JWT validator is a better
    // match than the literal-bearer sentinel (§4.1).
    if token.matches('.').count() == 2 {
        let issuer = token
            .split('.')
            .nth(1)
            .and_then(|payload| URL_SAFE_NO_PAD.decode(payload).ok())
            .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
            .and_then(|value| value.get("iss").and_then(|v| v.as_str()).map(str::to_string))
            .unwrap_or_default();
        Ok(Credential::Jwt {
            token: token.to_string(),
            issuer,
        })
    } else {
        Ok(Credential::Bearer {
            token: token.to_string(),
            configured_issuer: None,
        })
    }
}

#[rocket::post("/v1/ext_authz", data = "<body>")]
pub async fn check(body: Json<CheckRequest>, state: &State<AppState>) -> Json<CheckResponse> {
    let body = body.into_inner();
    let http = body.attributes.request.http;
    let credential_header = state.external_authz.credential_header.clone();

    let credential = match extract_credential(&http.headers, &credential_header) {
        Ok(credential) => credential,
        Err(err) => return Json(CheckResponse::denied(401, err.to_string())),
    };

    let subject_result = match state.trust_store.validate(&credential).await {
        Ok(result) => result,
        Err(err) => {
            let status = if err.is_authentication_failure() { 401 } else { 500 };
            return Json(CheckResponse::denied(status, "authentication failed"));
        }
    };

    let mut additional = BTreeMap::new();
    if !http.host.is_empty() {
        additional.insert("host".to_string(), serde_json::Value::String(http.host));
    }
    for (key, value) in body.attributes.context_extensions {
        additional.insert(key, serde_json::Value::String(value));
    }

    let request_attributes = RequestAttributes {
        method: http.method,
        path: http.path,
        ip_address: body
            .attributes
            .source
            .address
            .and_then(|addr| addr.socket_address)
            .map(|socket| socket.address)
            .unwrap_or_default(),
        user_agent: credential_header_value(&http.headers, "user-agent").unwrap_or_default().to_string(),
        headers: http.headers,
        additional,
    };

    let issuance = IssueTokensRequest {
        subject: subject_result,
        actor: None,
        request_attributes,
        requested_token_types: vec![state.external_authz.token_type.clone()],
        proposed_request_context: None,
    };

    match state.token_service.issue_tokens(issuance).await {
        Ok(mut tokens) => {
            let Some(token) = tokens.remove(&state.external_authz.token_type) else {
                return Json(CheckResponse::denied(500, "no token issued"));
            };
            let mut headers = BTreeMap::new();
            headers.insert(state.external_authz.response_header.clone(), token.value);
            Json(CheckResponse {
                status: CheckStatus::Ok,
                headers,
                headers_to_remove: vec![credential_header],
                code: None,
                body: None,
            })
        }
        Err(_) => Json(CheckResponse::denied(500, "token issuance failed")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_bearer_token_is_extracted_as_a_bearer_credential() {
        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_string(), "Bearer test-token-123".to_string());
        let credential = extract_credential(&headers, "authorization").unwrap();
        assert!(matches!(credential, Credential::Bearer { token, .. } if token == "test-token-123"));
    }

    #[test]
    fn jwt_shaped_bearer_token_is_extracted_as_a_jwt_credential() {
        let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"HS256\"}");
        let payload = URL_SAFE_NO_PAD.encode(b"{\"iss\":\"idp\"}");
        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_string(), format!("Bearer {header}.{payload}.sig"));
        let credential = extract_credential(&headers, "authorization").unwrap();
        assert!(matches!(credential, Credential::Jwt { issuer, .. } if issuer == "idp"));
    }

    #[test]
    fn missing_header_is_rejected() {
        let headers = BTreeMap::new();
        assert!(extract_credential(&headers, "authorization").is_err());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        assert_eq!(credential_header_value(&headers, "authorization"), Some("Bearer abc"));
    }
}
