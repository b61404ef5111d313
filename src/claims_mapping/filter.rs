// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Policy restricting which actor-supplied `request_context` claims survive
//! into a minted token (C11, §4.2). The server never accepts actor-supplied
//! `tctx` claims — this filter only ever applies to `req_ctx`.

use crate::claims::Claims;
use serde_json::Value;
use std::collections::BTreeSet;

/// How a [`ClaimsFilter`] disposes of a caller-proposed claim.
#[derive(Debug, Clone)]
pub enum ClaimsFilter {
    /// Only the named keys survive; everything else is dropped silently.
    AllowList(BTreeSet<String>),
    /// The named keys are dropped; everything else survives.
    DenyList(BTreeSet<String>),
    /// Every caller-proposed claim survives unmodified.
    Passthrough,
}

impl ClaimsFilter {
    pub fn allow(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ClaimsFilter::AllowList(keys.into_iter().map(Into::into).collect())
    }

    pub fn deny(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ClaimsFilter::DenyList(keys.into_iter().map(Into::into).collect())
    }

    /// Applies this filter to caller-proposed `request_context` claims.
    /// Unknown keys under an allow-list are dropped; the filter never
    /// rewrites values in this implementation, only admits or drops them.
    pub fn apply(&self, proposed: &Claims) -> Claims {
        let mut filtered = Claims::new();
        for (key, value) in proposed.iter() {
            if self.admits(key) {
                filtered.insert(key.clone(), value.clone());
            }
        }
        filtered
    }

    fn admits(&self, key: &str) -> bool {
        match self {
            ClaimsFilter::AllowList(allowed) => allowed.contains(key),
            ClaimsFilter::DenyList(denied) => !denied.contains(key),
            ClaimsFilter::Passthrough => true,
        }
    }
}

impl Default for ClaimsFilter {
    /// Absent configuration denies every actor-supplied claim — the safer
    /// default for a trust boundary.
    fn default() -> Self {
        ClaimsFilter::AllowList(BTreeSet::new())
    }
}

/// Parses a caller-proposed `request_context` JSON object into [`Claims`],
/// rejecting anything that is not a flat JSON object.
pub fn parse_proposed_request_context(value: &Value) -> Option<Claims> {
    let object = value.as_object()?;
    let mut claims = Claims::new();
    for (key, value) in object {
        claims.insert(key.clone(), value.clone());
    }
    Some(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Claims {
        let mut claims = Claims::new();
        claims.insert("device_id".to_string(), Value::String("abc".into()));
        claims.insert("tenant".to_string(), Value::String("acme".into()));
        claims
    }

    #[test]
    fn allow_list_keeps_only_named_keys() {
        let filter = ClaimsFilter::allow(["device_id"]);
        let filtered = filter.apply(&sample());
        assert!(filtered.get("device_id").is_some());
        assert!(filtered.get("tenant").is_none());
    }

    #[test]
    fn deny_list_drops_named_keys() {
        let filter = ClaimsFilter::deny(["tenant"]);
        let filtered = filter.apply(&sample());
        assert!(filtered.get("device_id").is_some());
        assert!(filtered.get("tenant").is_none());
    }

    #[test]
    fn passthrough_keeps_everything() {
        let filter = ClaimsFilter::Passthrough;
        let filtered = filter.apply(&sample());
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn default_denies_everything() {
        let filter = ClaimsFilter::default();
        let filtered = filter.apply(&sample());
        assert!(filtered.is_empty());
    }

    #[test]
    fn unknown_keys_under_passthrough_are_not_required_to_be_known() {
        let filter = ClaimsFilter::Passthrough;
        let mut proposed = Claims::new();
        proposed.insert("anything".to_string(), Value::Bool(true));
        assert_eq!(filter.apply(&proposed).len(), 1);
    }
}
