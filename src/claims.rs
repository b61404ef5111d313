// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Ordered `string → any` claim mapping shared by validators, claim mappers,
//! and issuers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// An ordered mapping from claim name to JSON value.
///
/// Backed by a `BTreeMap` rather than a `HashMap` so that serialization and
/// test assertions are stable across runs, and merges are deterministic when
/// two mappers touch the same key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(BTreeMap<String, Value>);

impl Claims {
    /// Creates an empty claim set.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no claims have been set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct claim names.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Inserts or overwrites a claim.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Reads a claim by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Removes a claim, returning its previous value if present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Iterates over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Merges `other` into `self`, last-writer-wins: keys present in `other`
    /// overwrite the same key in `self`.
    ///
    /// This is the merge discipline claim mappers use: mappers run
    /// sequentially and each result is merged with last-writer-wins (§4.2).
    pub fn merge(&mut self, other: Claims) {
        for (key, value) in other.0 {
            self.0.insert(key, value);
        }
    }

    /// Returns a deep copy. `Claims` is already `Clone`; this exists to name
    /// the "copy" operation the data model calls out explicitly (§3) at
    /// call sites that want to make the copy-not-alias intent legible.
    pub fn copy(&self) -> Claims {
        self.clone()
    }

    /// Converts to a plain `serde_json::Map` for embedding into a JWT claim
    /// set (e.g. as the value of `tctx` or `req_ctx`).
    pub fn into_json_value(self) -> Value {
        Value::Object(self.0.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for Claims {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Claims {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_is_last_writer_wins() {
        let mut a = Claims::new();
        a.insert("sub", "alice");
        a.insert("scope", "read");

        let mut b = Claims::new();
        b.insert("sub", "bob");

        a.merge(b);
        assert_eq!(a.get("sub"), Some(&json!("bob")));
        assert_eq!(a.get("scope"), Some(&json!("read")));
    }

    #[test]
    fn copy_does_not_alias() {
        let mut a = Claims::new();
        a.insert("k", "v1");
        let mut b = a.copy();
        b.insert("k", "v2");
        assert_eq!(a.get("k"), Some(&json!("v1")));
        assert_eq!(b.get("k"), Some(&json!("v2")));
    }

    #[test]
    fn into_json_value_produces_object() {
        let mut c = Claims::new();
        c.insert("a", 1);
        let v = c.into_json_value();
        assert_eq!(v, json!({"a": 1}));
    }
}
