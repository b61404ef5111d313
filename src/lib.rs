// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Parsec
//!
//! A trust-boundary token-exchange service. Parsec sits at the ingress of a
//! trust domain, consumes externally-issued credentials (bearer tokens,
//! JWTs, OIDC tokens), validates them against trust policy, and mints
//! short-lived, internally-signed transaction tokens that downstream
//! services inside the trust domain consume.
//!
//! ## Main components
//!
//! - **Validators & trust store** ([`validators`]): a polymorphic validator
//!   registry keyed by credential type and issuer, including JWT/JWKS
//!   validation, plus an actor-scoped filtered view.
//! - **Claim mapping** ([`claims_mapping`]): expression-based mappers that
//!   build the `tctx`/`req_ctx` claim fragments, and the filter that
//!   restricts actor-supplied request-context claims.
//! - **Data-source cache** ([`datasource`]): a fingerprint-keyed,
//!   single-flight, LRU-bounded cache with time-bucketed TTL and optional
//!   cluster-wide routing.
//! - **Rotating key manager** ([`keys`]): a dual-slot signing-key lifecycle
//!   with grace periods and optimistic-locked rotation state.
//! - **Issuers** ([`issuers`]): per-token-type claim assembly and signing.
//! - **Token service** ([`token_service`]): orchestrates enrichment, claim
//!   mapping, and issuance for a single request.
//! - **HTTP surface** ([`handlers`]): the external-authz hook, the token
//!   exchange endpoint, and the JWKS publisher.
//!
//! ## Binaries
//!
//! - **parsec**: the token-exchange service.

/// Build and version information for maintenance and debugging.
pub mod build_info;

/// Ordered claim mapping (`string -> any`): the currency of every
/// validation result and issued token.
pub mod claims;

/// Claim mappers and the actor-supplied request-context filter (§4.2).
pub mod claims_mapping;

/// Injectable clock capability for deterministic time in tests (§9).
pub mod clock;

/// Configuration loading, schema validation, and cross-field rules.
pub mod config;

/// Credential variants, the validation result, and the request-scoped
/// issuance context (§3).
pub mod credential;

/// Fingerprint-keyed, single-flight, LRU-bounded data-source cache, with
/// optional cluster-wide consistent-hash routing (§4.3).
pub mod datasource;

/// Error kinds shared across validation, issuance, and key rotation (§7).
pub mod error;

/// HTTP surface: token exchange, the external-authz hook, and the JWKS
/// publisher (§4.7, §6).
pub mod handlers;

/// Per-token-type issuers and the issuer registry (§4.5).
pub mod issuers;

/// Rotating dual-slot signing-key manager (§4.4).
pub mod keys;

/// Token-exchange orchestration: enrichment -> claim mapping -> issuance (§4.6).
pub mod token_service;

/// Validators and the trust store that selects between them (§4.1).
pub mod validators;
