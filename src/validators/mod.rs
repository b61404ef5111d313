// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Credential validators (C8) and the trust store that selects among them
//! (C9, §4.1).

mod json;
mod jwt;
mod trust_store;

pub use json::JsonValidator;
pub use jwt::JwtValidator;
pub use trust_store::{ActorPolicy, TrustStore};

use crate::credential::{Credential, CredentialType, ValidationResult};
use crate::error::ParsecError;
use async_trait::async_trait;

/// A polymorphic credential validator (C8). A validator MAY accept more
/// than one credential type — the JWT validator accepts both `JWT` and raw
/// `Bearer`, since opaque bearer strings often are JWTs (§4.1).
#[async_trait]
pub trait Validator: Send + Sync {
    /// The name this validator is registered and filtered under.
    fn name(&self) -> &str;

    fn credential_types(&self) -> &[CredentialType];

    async fn validate(&self, credential: &Credential) -> Result<ValidationResult, ParsecError>;
}
