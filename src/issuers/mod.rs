// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Per-token-type issuers (C12) and the registry mapping token-type URN to
//! issuer (C13, §4.5).

mod registry;
mod signing;
mod stub;
mod unsigned;

pub use registry::IssuerRegistry;
pub use signing::SigningTransactionTokenIssuer;
pub use stub::StubIssuer;
pub use unsigned::UnsignedTokenIssuer;

use crate::claims::Claims;
use crate::credential::{IssueContext, Token};
use crate::error::ParsecError;
use crate::keys::PublicKey;
use async_trait::async_trait;

/// URN for the signed transaction token type, per draft-ietf-oauth-transaction-tokens.
pub const TRANSACTION_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:txn_token";

/// Assembles claims and emits a signed or unsigned token (C12). `tctx` and
/// `req_ctx` are the already-mapped, already-filtered claim fragments the
/// token service built in steps 3-4 of orchestration (§4.6) — they are
/// passed alongside the immutable [`IssueContext`] rather than folded into
/// it, since the context is built once and shared across every requested
/// token type while `tctx`/`req_ctx` are per-mapper-chain outputs.
#[async_trait]
pub trait Issuer: Send + Sync {
    /// The token-type URN this issuer emits (used as the `IssuerRegistry` key).
    fn token_type(&self) -> &str;

    async fn issue(
        &self,
        context: &IssueContext,
        tctx: &Claims,
        req_ctx: &Claims,
    ) -> Result<Token, ParsecError>;

    /// Verification keys this issuer's tokens can be checked against. Empty
    /// for issuers that never sign (e.g. the unsigned issuer).
    fn public_keys(&self) -> Vec<PublicKey>;
}
