// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Data-source registry configuration (C6, C7), including the optional
//! cluster-wide cache.

use serde::{Deserialize, Serialize};

/// A single static data source, serving a fixed JSON payload (§4.3). Useful
/// for constant enrichment claims (tenant metadata, feature flags) that
/// don't require a network round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticDataSourceConfig {
    pub name: String,
    pub payload: serde_json::Value,

    /// TTL-bucketed cache duration in seconds. Zero disables caching.
    #[serde(default)]
    pub cache_ttl_seconds: i64,
}

/// One cluster peer this node can route cache misses to (C7 consistent
/// hashing, §6 `/_groupcache/` prefix).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterPeerConfig {
    pub id: String,
    pub base_url: String,
}

/// Cluster-wide data-source cache configuration. Absent disables clustering
/// entirely and every node serves its own local cache only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub self_id: String,

    #[serde(default)]
    pub peers: Vec<ClusterPeerConfig>,

    #[serde(default = "default_peer_timeout_seconds")]
    pub peer_timeout_seconds: u64,
}

fn default_peer_timeout_seconds() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceRegistryConfig {
    #[serde(default)]
    pub static_sources: Vec<StaticDataSourceConfig>,

    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: usize,

    pub cluster: Option<ClusterConfig>,
}

fn default_capacity_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for DataSourceRegistryConfig {
    fn default() -> Self {
        Self {
            static_sources: Vec::new(),
            capacity_bytes: default_capacity_bytes(),
            cluster: None,
        }
    }
}

impl Default for StaticDataSourceConfig {
    fn default() -> Self {
        Self {
            name: "example".to_string(),
            payload: serde_json::json!({}),
            cache_ttl_seconds: 0,
        }
    }
}
