// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Consistent-hash peer routing for cluster-wide data-source caching
//! (§4.3 Cluster mode). Cross-node traffic is confined to the dedicated
//! `/_groupcache/` path prefix (§6) and MUST NOT be publicly exposed.

use crate::credential::{DataSourceInput, DataSourceResult, RequestAttributes, ValidationResult};
use crate::error::ParsecError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

/// Identifies one node in the cluster cache peer group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub String);

/// Default cross-node cache RPC path prefix (§6). Strictly peer-to-peer.
pub const CLUSTER_PATH_PREFIX: &str = "/_groupcache/";

/// Number of virtual nodes per physical peer, smoothing load distribution
/// across the hash ring.
const VIRTUAL_NODES_PER_PEER: u32 = 128;

/// Deterministic consistent-hash ring mapping internal cache keys to a
/// single owning peer. Ownership changes on peer-list updates remap only
/// the affected slice of the keyspace (§4.3).
#[derive(Default, Clone)]
pub struct ConsistentHashRing {
    ring: BTreeMap<u64, PeerId>,
}

fn hash_u64(input: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[0..8].try_into().expect("sha256 digest is >= 8 bytes"))
}

impl ConsistentHashRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peer(&mut self, peer: PeerId) {
        for vnode in 0..VIRTUAL_NODES_PER_PEER {
            let key = hash_u64(&format!("{}#{}", peer.0, vnode));
            self.ring.insert(key, peer.clone());
        }
    }

    pub fn remove_peer(&mut self, peer: &PeerId) {
        self.ring.retain(|_, p| p != peer);
    }

    /// Returns the peer that owns `key`, or `None` if the ring is empty.
    pub fn owner(&self, key: &str) -> Option<PeerId> {
        if self.ring.is_empty() {
            return None;
        }
        let key_hash = hash_u64(key);
        match self.ring.range(key_hash..).next() {
            Some((_, peer)) => Some(peer.clone()),
            None => self.ring.values().next().cloned(),
        }
    }
}

/// Exactly what a data source produced, wrapped for the cluster transport.
/// A round-trip through this transport preserves `data` and `content_type`
/// bit-identically (§8 round-trip property).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterCacheEntry {
    pub data: DataSourceResult,
}

/// Wire request sent to the owning peer over the `/_groupcache/` path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterFetchRequest {
    pub source_name: String,
    pub internal_key: String,
    pub subject: ValidationResult,
    pub actor: Option<ValidationResult>,
    pub request_attributes: RequestAttributes,
}

impl ClusterFetchRequest {
    pub fn from_input(source_name: &str, internal_key: &str, input: &DataSourceInput<'_>) -> Self {
        Self {
            source_name: source_name.to_string(),
            internal_key: internal_key.to_string(),
            subject: input.subject.clone(),
            actor: input.actor.cloned(),
            request_attributes: input.request_attributes.clone(),
        }
    }
}

/// Capability for asking a specific peer to own and perform a fetch (§4.3,
/// §5). Requests are bounded by the caller's overall deadline; a missing
/// deadline MUST be treated as a bounded default, never infinity (§5).
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn fetch_from_peer<'a>(
        &'a self,
        owner: &PeerId,
        source_name: &str,
        internal_key: &str,
        input: DataSourceInput<'a>,
    ) -> Result<ClusterCacheEntry, ParsecError>;
}

/// HTTP [`PeerClient`] hitting `{peer_base_url}{CLUSTER_PATH_PREFIX}fetch`.
/// Peers are symmetric; any node may be asked (§4.3).
pub struct HttpPeerClient {
    client: reqwest::Client,
    peer_base_urls: std::collections::HashMap<PeerId, String>,
    timeout: Duration,
}

impl HttpPeerClient {
    pub fn new(peer_base_urls: std::collections::HashMap<PeerId, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            peer_base_urls,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_from_peer<'a>(
        &'a self,
        owner: &PeerId,
        source_name: &str,
        internal_key: &str,
        input: DataSourceInput<'a>,
    ) -> Result<ClusterCacheEntry, ParsecError> {
        let base_url = self
            .peer_base_urls
            .get(owner)
            .ok_or_else(|| ParsecError::Upstream(format!("unknown peer {owner:?}")))?;
        let url = format!("{base_url}{CLUSTER_PATH_PREFIX}fetch");
        let request = ClusterFetchRequest::from_input(source_name, internal_key, &input);

        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(&url).json(&request).send(),
        )
        .await
        .map_err(|_| ParsecError::Upstream(format!("cluster fetch to {owner:?} timed out")))?
        .map_err(|e| ParsecError::Upstream(format!("cluster fetch to {owner:?} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ParsecError::Upstream(format!(
                "cluster peer {owner:?} returned status {}",
                response.status()
            )));
        }

        response
            .json::<ClusterCacheEntry>()
            .await
            .map_err(|e| ParsecError::Upstream(format!("malformed cluster response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_deterministic_for_same_peer_set() {
        let mut ring_a = ConsistentHashRing::new();
        let mut ring_b = ConsistentHashRing::new();
        for name in ["peer-1", "peer-2", "peer-3"] {
            ring_a.add_peer(PeerId(name.to_string()));
            ring_b.add_peer(PeerId(name.to_string()));
        }

        for key in ["alice", "bob", "carol", "dave"] {
            assert_eq!(ring_a.owner(key), ring_b.owner(key));
        }
    }

    #[test]
    fn removing_a_peer_only_remaps_its_slice() {
        let mut ring = ConsistentHashRing::new();
        for name in ["peer-1", "peer-2", "peer-3"] {
            ring.add_peer(PeerId(name.to_string()));
        }

        let keys: Vec<String> = (0..200).map(|i| format!("key-{i}")).collect();
        let before: Vec<_> = keys.iter().map(|k| ring.owner(k)).collect();

        ring.remove_peer(&PeerId("peer-2".to_string()));
        let after: Vec<_> = keys.iter().map(|k| ring.owner(k)).collect();

        let unaffected = before
            .iter()
            .zip(after.iter())
            .filter(|(b, a)| b == a)
            .count();
        // Keys not owned by the removed peer should be unaffected.
        let owned_by_removed = before
            .iter()
            .filter(|p| *p == &Some(PeerId("peer-2".to_string())))
            .count();
        assert_eq!(unaffected, keys.len() - owned_by_removed);
    }

    #[test]
    fn empty_ring_has_no_owner() {
        let ring = ConsistentHashRing::new();
        assert_eq!(ring.owner("anything"), None);
    }
}
