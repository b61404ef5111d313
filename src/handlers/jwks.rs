// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! JWKS publisher (C16, §6): the union of every registered issuer's
//! verification keys, in RFC 7517 `{"keys": [...]}` shape.

use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
struct JwksResponse {
    keys: Vec<jsonwebtoken::jwk::Jwk>,
}

fn current_jwks(state: &AppState) -> Json<JwksResponse> {
    let keys = state.issuers.all_public_keys().into_iter().map(|key| key.jwk).collect();
    Json(JwksResponse { keys })
}

#[rocket::get("/v1/jwks.json")]
pub async fn jwks(state: &State<AppState>) -> Json<JwksResponse> {
    current_jwks(state)
}

#[rocket::get("/.well-known/jwks.json")]
pub async fn jwks_well_known(state: &State<AppState>) -> Json<JwksResponse> {
    current_jwks(state)
}
