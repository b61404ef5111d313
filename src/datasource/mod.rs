// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Pluggable enrichment fetchers (C6) and the fingerprint-keyed,
//! single-flight, LRU-bounded cache over them (C7, §4.3).

mod cluster;
mod registry;
mod sources;

pub use cluster::{
    ClusterCacheEntry, ClusterFetchRequest, ConsistentHashRing, HttpPeerClient, PeerClient,
    PeerId, CLUSTER_PATH_PREFIX,
};
pub use registry::{DataSourceLookup, DataSourceRegistry};
pub use sources::StaticDataSource;

use crate::credential::{DataSourceInput, DataSourceResult};
use crate::error::ParsecError;
use async_trait::async_trait;
use chrono::Duration;

/// A pluggable enrichment fetcher (C6).
///
/// `fetch` MUST NOT retain references beyond its own return — the borrowed
/// [`DataSourceInput`] is only valid for the duration of the call (§3).
#[async_trait]
pub trait DataSource: Send + Sync {
    /// The name this source is registered and looked up under.
    fn name(&self) -> &str;

    /// Produces serialized bytes plus a content type for this input.
    async fn fetch<'a>(
        &'a self,
        input: DataSourceInput<'a>,
    ) -> Result<DataSourceResult, ParsecError>;

    /// Cache key for this input, or `None`/empty to disable caching for this
    /// particular fetch (§4.3). Sources that are never cacheable simply
    /// never override this.
    fn cache_key(&self, _input: &DataSourceInput<'_>) -> Option<String> {
        None
    }

    /// Cache TTL; zero means "cache forever" (§3, §4.3).
    fn cache_ttl(&self) -> Duration {
        Duration::zero()
    }
}
