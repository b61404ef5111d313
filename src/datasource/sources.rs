// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Built-in [`DataSource`] implementations (C6).

use crate::credential::{ContentType, DataSourceInput, DataSourceResult};
use crate::datasource::DataSource;
use crate::error::ParsecError;
use async_trait::async_trait;
use chrono::Duration;
use std::sync::RwLock;

/// A [`DataSource`] returning a fixed JSON payload, independent of the
/// subject, actor, or request attributes presented.
///
/// Useful for config-driven enrichment that needs no upstream call at all
/// (e.g. a static tenant-wide feature flag set). Optionally cacheable if
/// constructed with a non-zero TTL, letting operators exercise the cache
/// path without standing up a real upstream.
pub struct StaticDataSource {
    name: String,
    payload: RwLock<Vec<u8>>,
    cache_ttl: Duration,
}

impl StaticDataSource {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Result<Self, ParsecError> {
        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| ParsecError::Configuration(format!("invalid static payload: {e}")))?;
        Ok(Self {
            name: name.into(),
            payload: RwLock::new(bytes),
            cache_ttl: Duration::zero(),
        })
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Replaces the payload in place, e.g. for config hot-reload.
    pub fn set_payload(&self, payload: serde_json::Value) -> Result<(), ParsecError> {
        let bytes = serde_json::to_vec(&payload)
            .map_err(|e| ParsecError::Configuration(format!("invalid static payload: {e}")))?;
        *self.payload.write().expect("static data source lock poisoned") = bytes;
        Ok(())
    }
}

#[async_trait]
impl DataSource for StaticDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch<'a>(
        &'a self,
        _input: DataSourceInput<'a>,
    ) -> Result<DataSourceResult, ParsecError> {
        let data = self
            .payload
            .read()
            .expect("static data source lock poisoned")
            .clone();
        Ok(DataSourceResult {
            data,
            content_type: ContentType::Json,
        })
    }

    fn cache_key(&self, _input: &DataSourceInput<'_>) -> Option<String> {
        if self.cache_ttl > Duration::zero() {
            Some(format!("static:{}", self.name))
        } else {
            None
        }
    }

    fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::RequestAttributes;
    use crate::credential::ValidationResult;
    use chrono::Utc;

    #[tokio::test]
    async fn returns_configured_payload_regardless_of_subject() {
        let source =
            StaticDataSource::new("flags", serde_json::json!({"beta": true})).unwrap();
        let subject = ValidationResult::anonymous("example.org", Utc::now());
        let attrs = RequestAttributes::default();
        let input = DataSourceInput {
            subject: &subject,
            actor: None,
            request_attributes: &attrs,
        };

        let result = source.fetch(input).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&result.data).unwrap();
        assert_eq!(value, serde_json::json!({"beta": true}));
        assert_eq!(result.content_type, ContentType::Json);
    }

    #[test]
    fn cache_key_is_none_without_ttl() {
        let source = StaticDataSource::new("flags", serde_json::json!({})).unwrap();
        let subject = ValidationResult::anonymous("example.org", Utc::now());
        let attrs = RequestAttributes::default();
        let input = DataSourceInput {
            subject: &subject,
            actor: None,
            request_attributes: &attrs,
        };
        assert_eq!(source.cache_key(&input), None);
    }

    #[test]
    fn cache_key_is_present_with_ttl() {
        let source = StaticDataSource::new("flags", serde_json::json!({}))
            .unwrap()
            .with_cache_ttl(Duration::minutes(5));
        let subject = ValidationResult::anonymous("example.org", Utc::now());
        let attrs = RequestAttributes::default();
        let input = DataSourceInput {
            subject: &subject,
            actor: None,
            request_attributes: &attrs,
        };
        assert!(source.cache_key(&input).is_some());
    }
}
