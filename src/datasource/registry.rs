// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Single-flight, LRU-bounded, TTL-bucketed cache over [`super::DataSource`]
//! instances, with optional cluster-wide routing (C7, §4.3).

use crate::clock::Clock;
use crate::credential::{DataSourceInput, DataSourceResult};
use crate::datasource::cluster::{ConsistentHashRing, PeerClient};
use crate::datasource::DataSource;
use crate::error::ParsecError;
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Capability a [`crate::credential::IssueContext`] hands to claim mappers so
/// `datasource(name)` can trigger a lazy, cached fetch (§3, §4.2).
#[async_trait]
pub trait DataSourceLookup: Send + Sync {
    /// Fetches the named source. Returns `None` when the source is unknown
    /// or its fetch failed — failures are advisory enrichment, not ground
    /// truth, and never fail token issuance (§4.3 Failure policy).
    async fn fetch_named<'a>(
        &'a self,
        name: &str,
        input: DataSourceInput<'a>,
    ) -> Option<DataSourceResult>;
}

type InFlight = Arc<OnceCell<Result<DataSourceResult, String>>>;

struct LruState {
    order: Vec<String>, // most-recently-used at the end
    entries: HashMap<String, DataSourceResult>,
    total_bytes: usize,
}

impl LruState {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            entries: HashMap::new(),
            total_bytes: 0,
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }

    fn get(&mut self, key: &str) -> Option<DataSourceResult> {
        let found = self.entries.get(key).cloned();
        if found.is_some() {
            self.touch(key);
        }
        found
    }

    fn insert(&mut self, key: String, value: DataSourceResult, capacity_bytes: usize) {
        let size = value.data.len();
        if let Some(old) = self.entries.insert(key.clone(), value) {
            self.total_bytes -= old.data.len();
        } else {
            self.order.push(key.clone());
        }
        self.total_bytes += size;
        self.touch(&key);

        while self.total_bytes > capacity_bytes {
            if self.order.is_empty() {
                break;
            }
            let evicted_key = self.order.remove(0);
            if let Some(evicted) = self.entries.remove(&evicted_key) {
                self.total_bytes -= evicted.data.len();
            }
        }
    }
}

/// Single-flight, LRU-bounded, TTL-bucketed registry of named
/// [`DataSource`]s. Default capacity is 64 MiB of serialized bytes (§4.3).
pub struct DataSourceRegistry {
    sources: HashMap<String, Arc<dyn DataSource>>,
    lru: Mutex<LruState>,
    capacity_bytes: usize,
    in_flight: DashMap<String, InFlight>,
    clock: Arc<dyn Clock>,
    cluster: Option<ClusterRouting>,
    fetch_count: AtomicUsize,
}

struct ClusterRouting {
    ring: ConsistentHashRing,
    self_id: crate::datasource::cluster::PeerId,
    peer_client: Arc<dyn PeerClient>,
}

const DEFAULT_CAPACITY_BYTES: usize = 64 * 1024 * 1024;

impl DataSourceRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sources: HashMap::new(),
            lru: Mutex::new(LruState::new()),
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            in_flight: DashMap::new(),
            clock,
            cluster: None,
            fetch_count: AtomicUsize::new(0),
        }
    }

    pub fn with_capacity_bytes(mut self, capacity_bytes: usize) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }

    /// Enables cluster-wide routing: non-owned keys become an RPC to the
    /// owning peer instead of a local fetch (§4.3 Cluster mode).
    pub fn with_cluster(
        mut self,
        self_id: crate::datasource::cluster::PeerId,
        peers: Vec<crate::datasource::cluster::PeerId>,
        peer_client: Arc<dyn PeerClient>,
    ) -> Self {
        let mut ring = ConsistentHashRing::new();
        for peer in peers {
            ring.add_peer(peer);
        }
        self.cluster = Some(ClusterRouting {
            ring,
            self_id,
            peer_client,
        });
        self
    }

    /// Updates the peer list. Takes effect on the next lookup (§4.3).
    pub fn update_peers(&mut self, peers: Vec<crate::datasource::cluster::PeerId>) {
        if let Some(cluster) = &mut self.cluster {
            let mut ring = ConsistentHashRing::new();
            for peer in peers {
                ring.add_peer(peer);
            }
            cluster.ring = ring;
        }
    }

    pub fn register(&mut self, source: Arc<dyn DataSource>) -> Result<(), ParsecError> {
        let name = source.name().to_string();
        if self.sources.contains_key(&name) {
            return Err(ParsecError::Configuration(format!(
                "duplicate data source name '{name}'"
            )));
        }
        self.sources.insert(name, source);
        Ok(())
    }

    /// Number of `Fetch` invocations performed so far — exposed only for
    /// single-flight property tests (§8).
    #[cfg(test)]
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    fn internal_key(&self, source_name: &str, user_key: &str, ttl: chrono::Duration) -> String {
        if ttl.is_zero() {
            format!("{source_name}:{user_key}")
        } else {
            let ttl_secs = ttl.num_seconds().max(1);
            let now_secs = self.clock.now().timestamp();
            let bucket = now_secs / ttl_secs;
            format!("{source_name}:{user_key}:{bucket}")
        }
    }

    async fn fetch_local<'a>(
        &'a self,
        source: &'a dyn DataSource,
        input: DataSourceInput<'a>,
    ) -> Option<DataSourceResult> {
        let user_key = source.cache_key(&input);
        let user_key = match user_key {
            Some(key) if !key.is_empty() => key,
            _ => {
                self.fetch_count.fetch_add(1, Ordering::SeqCst);
                return source.fetch(input).await.ok();
            }
        };

        let ttl = source.cache_ttl();
        let internal_key = self.internal_key(source.name(), &user_key, ttl);

        if let Some(cached) = self.lru.lock().unwrap().get(&internal_key) {
            return Some(cached);
        }

        let cell = self
            .in_flight
            .entry(internal_key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let fetch_count = &self.fetch_count;
        let result = cell
            .get_or_try_init(|| async move {
                fetch_count.fetch_add(1, Ordering::SeqCst);
                source.fetch(input).await.map_err(|e| e.to_string())
            })
            .await
            .cloned();

        self.in_flight
            .remove_if(&internal_key, |_, v| Arc::ptr_eq(v, &cell));

        match result {
            Ok(entry) => {
                self.lru
                    .lock()
                    .unwrap()
                    .insert(internal_key, entry.clone(), self.capacity_bytes);
                Some(entry)
            }
            Err(msg) => {
                debug!("data source '{}' fetch failed: {}", source.name(), msg);
                None
            }
        }
    }

    /// Serves one incoming `/_groupcache/` request on behalf of a peer that
    /// already resolved this node as owner (§4.3, §6). Always performs the
    /// local single-flight fetch — never re-routes, since re-routing here
    /// would risk a ping-pong between two peers with disagreeing rings.
    pub async fn fetch_for_peer<'a>(
        &'a self,
        source_name: &str,
        input: DataSourceInput<'a>,
    ) -> Option<DataSourceResult> {
        let source = self.sources.get(source_name)?.as_ref();
        self.fetch_local(source, input).await
    }
}

#[async_trait]
impl DataSourceLookup for DataSourceRegistry {
    async fn fetch_named<'a>(
        &'a self,
        name: &str,
        input: DataSourceInput<'a>,
    ) -> Option<DataSourceResult> {
        let source = match self.sources.get(name) {
            Some(source) => source.as_ref(),
            None => {
                warn!("no data source registered under name '{}'", name);
                return None;
            }
        };

        let Some(cluster) = &self.cluster else {
            return self.fetch_local(source, input).await;
        };

        let user_key = source.cache_key(&input).unwrap_or_default();
        if user_key.is_empty() {
            return self.fetch_local(source, input).await;
        }
        let ttl = source.cache_ttl();
        let internal_key = self.internal_key(name, &user_key, ttl);
        let owner = cluster.ring.owner(&internal_key);

        match owner {
            Some(owner_id) if owner_id != cluster.self_id => {
                match cluster
                    .peer_client
                    .fetch_from_peer(&owner_id, name, &internal_key, input)
                    .await
                {
                    Ok(entry) => {
                        // Hot keys may be cached locally by the caller too.
                        self.lru
                            .lock()
                            .unwrap()
                            .insert(internal_key, entry.data.clone(), self.capacity_bytes);
                        Some(entry.data)
                    }
                    Err(e) => {
                        debug!("cluster fetch from {owner_id:?} failed: {e}");
                        None
                    }
                }
            }
            _ => self.fetch_local(source, input).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::claims::Claims;
    use crate::credential::{RequestAttributes, ValidationResult};
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    struct CountingSource {
        calls: Arc<StdAtomicUsize>,
        ttl: chrono::Duration,
    }

    #[async_trait]
    impl DataSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        async fn fetch<'a>(
            &'a self,
            _input: DataSourceInput<'a>,
        ) -> Result<DataSourceResult, ParsecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DataSourceResult {
                data: b"{}".to_vec(),
                content_type: crate::credential::ContentType::Json,
            })
        }

        fn cache_key(&self, _input: &DataSourceInput<'_>) -> Option<String> {
            Some("fixed-key".to_string())
        }

        fn cache_ttl(&self) -> chrono::Duration {
            self.ttl
        }
    }

    fn subject() -> ValidationResult {
        ValidationResult {
            subject: "alice".into(),
            issuer: "idp".into(),
            trust_domain: "parsec.test".into(),
            claims: Claims::new(),
            issued_at: Utc::now(),
            expires_at: None,
            audience: vec![],
            scope: String::new(),
        }
    }

    #[tokio::test]
    async fn ttl_bucket_rollover_matches_scenario_3() {
        let start = "2025-10-08T14:37:42Z".parse::<chrono::DateTime<Utc>>().unwrap();
        let clock = Arc::new(TestClock::new(start));
        let calls = Arc::new(StdAtomicUsize::new(0));

        let mut registry = DataSourceRegistry::new(clock.clone() as Arc<dyn Clock>);
        registry
            .register(Arc::new(CountingSource {
                calls: calls.clone(),
                ttl: chrono::Duration::hours(1),
            }))
            .unwrap();

        let subj = subject();
        let req = RequestAttributes::default();
        let input = DataSourceInput {
            subject: &subj,
            actor: None,
            request_attributes: &req,
        };

        registry.fetch_named("counting", input).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.set("2025-10-08T14:40:00Z".parse().unwrap());
        registry.fetch_named("counting", input).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "same bucket, no new fetch");

        clock.set("2025-10-08T14:55:00Z".parse().unwrap());
        registry.fetch_named("counting", input).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "still same hour bucket");

        clock.set("2025-10-08T15:05:00Z".parse().unwrap());
        registry.fetch_named("counting", input).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2, "new hour bucket, new fetch");
    }

    #[tokio::test]
    async fn concurrent_fetches_for_same_key_single_flight() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let calls = Arc::new(StdAtomicUsize::new(0));

        let mut registry = DataSourceRegistry::new(clock as Arc<dyn Clock>);
        registry
            .register(Arc::new(CountingSource {
                calls: calls.clone(),
                ttl: chrono::Duration::hours(1),
            }))
            .unwrap();
        let registry = Arc::new(registry);

        let subj = Arc::new(subject());
        let req = Arc::new(RequestAttributes::default());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let subj = subj.clone();
            let req = req.clone();
            handles.push(tokio::spawn(async move {
                let input = DataSourceInput {
                    subject: &subj,
                    actor: None,
                    request_attributes: &req,
                };
                registry.fetch_named("counting", input).await
            }));
        }

        for h in handles {
            let result = h.await.unwrap();
            assert!(result.is_some());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_source_name_yields_none_not_error() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let registry = DataSourceRegistry::new(clock as Arc<dyn Clock>);

        let subj = subject();
        let req = RequestAttributes::default();
        let input = DataSourceInput {
            subject: &subj,
            actor: None,
            request_attributes: &req,
        };

        assert!(registry.fetch_named("nonexistent", input).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let mut registry = DataSourceRegistry::new(clock as Arc<dyn Clock>);
        let calls = Arc::new(StdAtomicUsize::new(0));
        registry
            .register(Arc::new(CountingSource {
                calls: calls.clone(),
                ttl: chrono::Duration::zero(),
            }))
            .unwrap();
        let result = registry.register(Arc::new(CountingSource {
            calls,
            ttl: chrono::Duration::zero(),
        }));
        assert!(matches!(result, Err(ParsecError::Configuration(_))));
    }
}
