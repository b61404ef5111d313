// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Claim mapper chain and request-context filter configuration (C10, C11).

use crate::claims_mapping::{ClaimExpression, ClaimsFilter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One `claim_name = expression` entry in a mapper chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimExpressionConfig {
    pub claim: String,
    pub expression: String,
}

impl From<&ClaimExpressionConfig> for ClaimExpression {
    fn from(config: &ClaimExpressionConfig) -> Self {
        ClaimExpression::new(config.claim.clone(), config.expression.clone())
    }
}

/// Allow-list/deny-list configuration for a [`ClaimsFilter`]. Exactly one of
/// `allow`/`deny` should be set; an entry with neither behaves as
/// passthrough, which is almost never what you want at a trust boundary.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClaimsFilterConfig {
    pub allow: Option<Vec<String>>,
    pub deny: Option<Vec<String>>,
}

impl From<&ClaimsFilterConfig> for ClaimsFilter {
    fn from(config: &ClaimsFilterConfig) -> Self {
        if let Some(allow) = &config.allow {
            ClaimsFilter::allow(allow.iter().cloned().collect::<BTreeSet<_>>())
        } else if let Some(deny) = &config.deny {
            ClaimsFilter::deny(deny.iter().cloned().collect::<BTreeSet<_>>())
        } else {
            ClaimsFilter::default()
        }
    }
}

/// Per-token-type request-context filter, keyed by the token type URN the
/// filter applies to when merging a caller-proposed request context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContextFilterConfig {
    pub token_type: String,

    #[serde(flatten)]
    pub filter: ClaimsFilterConfig,
}

/// Claim mapping configuration: the `tctx` chain, the `req_ctx` chain, and
/// the per-token-type request-context filters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClaimMappingConfig {
    #[serde(default)]
    pub transaction_context: Vec<ClaimExpressionConfig>,

    #[serde(default)]
    pub request_context: Vec<ClaimExpressionConfig>,

    #[serde(default)]
    pub request_context_filters: Vec<RequestContextFilterConfig>,
}
