// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Dual-slot rotating key manager (C5, §4.4).
//!
//! Holds the slot store and key provider as borrowed capabilities and caches
//! the active signer plus the full verification-key set behind a single
//! `arc-swap` pointer so hot-path reads (`get_current_signer`, `public_keys`)
//! never touch the store or the key provider.

use crate::clock::Clock;
use crate::error::ParsecError;
use crate::keys::jwk::PublicKey;
use crate::keys::provider::{KeyProvider, Signer};
use crate::keys::slot::{KeySlot, KeySlotStore, SlotPosition, SlotState};
use arc_swap::ArcSwap;
use chrono::Duration;
use jsonwebtoken::Algorithm;
use std::sync::Arc;

/// Tunable rotation parameters (§4.4). Constraints enforced by [`RotationParams::validate`]:
/// `grace_period < rotation_threshold < key_ttl`.
#[derive(Debug, Clone, Copy)]
pub struct RotationParams {
    pub key_ttl: Duration,
    pub rotation_threshold: Duration,
    pub grace_period: Duration,
    pub check_interval: Duration,
    pub prepare_timeout: Duration,
}

impl Default for RotationParams {
    fn default() -> Self {
        Self {
            key_ttl: Duration::hours(24),
            rotation_threshold: Duration::hours(6),
            grace_period: Duration::hours(2),
            check_interval: Duration::minutes(1),
            prepare_timeout: Duration::minutes(1),
        }
    }
}

impl RotationParams {
    pub fn validate(&self) -> Result<(), ParsecError> {
        if !(self.grace_period < self.rotation_threshold && self.rotation_threshold < self.key_ttl)
        {
            return Err(ParsecError::Configuration(format!(
                "rotation parameters must satisfy grace_period < rotation_threshold < key_ttl, \
                 got grace_period={:?}, rotation_threshold={:?}, key_ttl={:?}",
                self.grace_period, self.rotation_threshold, self.key_ttl
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
struct ActiveKeyCache {
    signer: Signer,
    public_keys: Vec<PublicKey>,
}

/// Dual-slot (A/B) signing-key lifecycle manager for one
/// (`token_type`, `trust_domain`) pair (C5).
pub struct RotatingKeyManager {
    token_type: String,
    trust_domain: String,
    algorithm: Algorithm,
    params: RotationParams,
    slot_store: Arc<dyn KeySlotStore>,
    key_provider: Arc<dyn KeyProvider>,
    clock: Arc<dyn Clock>,
    cache: ArcSwap<ActiveKeyCache>,
}

impl RotatingKeyManager {
    /// Creates a manager and performs the §4.4 startup sequence: if no slots
    /// exist for this token type, generates into slot A with
    /// `rotation_completed_at = now`. Initializes the in-memory cache
    /// synchronously; fails if either collaborator is unreachable.
    pub async fn new(
        token_type: impl Into<String>,
        trust_domain: impl Into<String>,
        algorithm: Algorithm,
        params: RotationParams,
        slot_store: Arc<dyn KeySlotStore>,
        key_provider: Arc<dyn KeyProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ParsecError> {
        params.validate()?;
        let token_type = token_type.into();
        let trust_domain = trust_domain.into();

        let (slot_a, slot_b, version) = slot_store.load(&token_type, &trust_domain).await?;

        let (slot_a, slot_b, version) = if slot_a.is_none() && slot_b.is_none() {
            let now = clock.now();
            let fresh = KeySlot {
                position: SlotPosition::A,
                token_type: token_type.clone(),
                key_manager_id: format!("{trust_domain}:{token_type}"),
                preparing_at: None,
                rotation_completed_at: Some(now),
                algorithm,
                generation: 1,
            };
            let new_version = slot_store
                .save(
                    &token_type,
                    &trust_domain,
                    Some(fresh.clone()),
                    None,
                    version,
                )
                .await?;
            (Some(fresh), None, new_version)
        } else {
            (slot_a, slot_b, version)
        };
        let _ = version;

        let manager = Self {
            token_type,
            trust_domain,
            algorithm,
            params,
            slot_store,
            key_provider,
            clock,
            // Placeholder until the synchronous refresh below populates it;
            // never observed because refresh_cache always runs before return.
            cache: ArcSwap::from_pointee(ActiveKeyCache {
                signer: Signer {
                    id: String::new(),
                    algorithm,
                    encoding_key: Arc::new(jsonwebtoken::EncodingKey::from_secret(b"")),
                    public_key: dummy_public_key(),
                },
                public_keys: Vec::new(),
            }),
        };

        manager.refresh_cache_from(slot_a, slot_b).await?;
        Ok(manager)
    }

    /// Runs one rotation check: selects a source slot needing rotation (if
    /// any), drives the two-phase commit against the opposite slot, then
    /// refreshes the in-memory cache. Never returns an error to the caller
    /// for contested rotations — `VersionMismatch`/`RotationContested` means
    /// another process is handling it and is swallowed here, matching the
    /// "never surfaced to callers" contract in §7.
    pub async fn check_rotation_once(&self) -> Result<(), ParsecError> {
        let (slot_a, slot_b, version) = self
            .slot_store
            .load(&self.token_type, &self.trust_domain)
            .await?;

        let now = self.clock.now();

        let source = [&slot_a, &slot_b]
            .into_iter()
            .flatten()
            .find(|slot| self.needs_rotation(slot, now));

        if let Some(source) = source {
            let target_pos = source.position.other();
            let target_current = match target_pos {
                SlotPosition::A => &slot_a,
                SlotPosition::B => &slot_b,
            };

            let target_is_newer = target_current
                .as_ref()
                .and_then(|t| t.rotation_completed_at)
                .zip(source.rotation_completed_at)
                .map(|(t, s)| t > s)
                .unwrap_or(false);

            if !target_is_newer {
                self.run_two_phase_commit(
                    target_pos,
                    slot_a.clone(),
                    slot_b.clone(),
                    version,
                    now,
                )
                .await;
            }
        }

        // Always attempt to refresh the cache from whatever is currently
        // persisted. On failure the previous cache is retained untouched
        // (graceful degradation, §4.4 Failure semantics) — unless there is
        // no non-expired slot left at all (the process was paused past
        // `key_ttl` on every slot simultaneously), in which case there is
        // nothing left to retain and self-healing is the only way back to a
        // valid signer.
        let (slot_a, slot_b, version) = match self
            .slot_store
            .load(&self.token_type, &self.trust_domain)
            .await
        {
            Ok(loaded) => loaded,
            Err(_) => return Ok(()),
        };
        if self
            .refresh_cache_from(slot_a.clone(), slot_b.clone())
            .await
            .is_err()
        {
            self.self_heal(slot_a, version, now).await;
        }
        Ok(())
    }

    /// Recovery for "every slot expired at once": mints a fresh key straight
    /// into slot A with `rotation_completed_at = now`, the same way
    /// [`Self::new`] bootstraps an empty store, so the manager recovers a
    /// valid signer instead of being stuck serving an expired one with no
    /// path back (unlike the bootstrap branch, this can race a peer running
    /// the same recovery; a lost CAS here is treated the same as a lost
    /// rotation race and silently dropped).
    async fn self_heal(
        &self,
        existing_slot_a: Option<KeySlot>,
        expected_version: u64,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        let generation = existing_slot_a.as_ref().map_or(1, |slot| slot.generation + 1);
        let fresh = KeySlot {
            position: SlotPosition::A,
            token_type: self.token_type.clone(),
            key_manager_id: format!("{}:{}", self.trust_domain, self.token_type),
            preparing_at: None,
            rotation_completed_at: Some(now),
            algorithm: self.algorithm,
            generation,
        };

        if self
            .slot_store
            .save(
                &self.token_type,
                &self.trust_domain,
                Some(fresh.clone()),
                None,
                expected_version,
            )
            .await
            .is_err()
        {
            return; // another process self-healed (or rotated) first
        }

        let _ = self.refresh_cache_from(Some(fresh), None).await;
    }

    fn needs_rotation(&self, slot: &KeySlot, now: chrono::DateTime<chrono::Utc>) -> bool {
        if slot.state(now, self.params.prepare_timeout) != SlotState::Complete {
            return false;
        }
        if slot.is_expired(now, self.params.key_ttl) {
            return false;
        }
        match slot.rotation_completed_at {
            Some(completed) => now - completed >= self.params.key_ttl - self.params.rotation_threshold,
            None => false,
        }
    }

    async fn run_two_phase_commit(
        &self,
        target_pos: SlotPosition,
        slot_a: Option<KeySlot>,
        slot_b: Option<KeySlot>,
        expected_version: u64,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        let target_existing = match target_pos {
            SlotPosition::A => &slot_a,
            SlotPosition::B => &slot_b,
        };
        // Every new rotation into a position gets a fresh generation number,
        // so the key provider mints new material instead of returning what
        // it cached the last time this position was used.
        let generation = target_existing.as_ref().map_or(1, |slot| slot.generation + 1);

        let preparing_slot = KeySlot {
            position: target_pos,
            token_type: self.token_type.clone(),
            key_manager_id: format!("{}:{}", self.trust_domain, self.token_type),
            preparing_at: Some(now),
            rotation_completed_at: None,
            algorithm: self.algorithm,
            generation,
        };

        let (new_a, new_b) = match target_pos {
            SlotPosition::A => (Some(preparing_slot.clone()), slot_b),
            SlotPosition::B => (slot_a, Some(preparing_slot.clone())),
        };

        let version_after_prepare = match self
            .slot_store
            .save(
                &self.token_type,
                &self.trust_domain,
                new_a,
                new_b,
                expected_version,
            )
            .await
        {
            Ok(v) => v,
            Err(_) => return, // contested: another process is handling it
        };

        let key_name = preparing_slot.provider_key_name();
        let namespace = format!("{}:{}", self.trust_domain, self.token_type);
        let signer = match self
            .key_provider
            .generate(&namespace, &key_name, self.algorithm)
            .await
        {
            Ok(signer) => signer,
            Err(_) => return, // key-provider failure: abandon this attempt
        };
        let _ = signer;

        let completed_at = self.clock.now();
        let completed_slot = KeySlot {
            position: target_pos,
            token_type: self.token_type.clone(),
            key_manager_id: namespace,
            preparing_at: None,
            rotation_completed_at: Some(completed_at),
            algorithm: self.algorithm,
            generation,
        };

        // Re-read the opposite slot so we don't clobber a concurrent change
        // to it while we were preparing.
        let (current_a, current_b, _v) = match self
            .slot_store
            .load(&self.token_type, &self.trust_domain)
            .await
        {
            Ok(loaded) => loaded,
            Err(_) => return,
        };

        let (final_a, final_b) = match target_pos {
            SlotPosition::A => (Some(completed_slot), current_b),
            SlotPosition::B => (current_a, Some(completed_slot)),
        };

        // A VersionMismatch here means another node completed the same
        // rotation concurrently — acceptable per §4.4.
        let _ = self
            .slot_store
            .save(
                &self.token_type,
                &self.trust_domain,
                final_a,
                final_b,
                version_after_prepare,
            )
            .await;
    }

    /// Recomputes the active signer and verification set from `slot_a`/`slot_b`
    /// and atomically swaps them into the hot-path cache.
    async fn refresh_cache_from(
        &self,
        slot_a: Option<KeySlot>,
        slot_b: Option<KeySlot>,
    ) -> Result<(), ParsecError> {
        let now = self.clock.now();
        let slots: Vec<KeySlot> = [slot_a, slot_b].into_iter().flatten().collect();

        let non_expired: Vec<&KeySlot> = slots
            .iter()
            .filter(|s| s.rotation_completed_at.is_some() && !s.is_expired(now, self.params.key_ttl))
            .collect();

        let mut public_keys = Vec::with_capacity(non_expired.len());
        let mut signers_by_position = std::collections::HashMap::new();
        for slot in &non_expired {
            let namespace = format!("{}:{}", self.trust_domain, self.token_type);
            let signer = self
                .key_provider
                .generate(&namespace, &slot.provider_key_name(), slot.algorithm)
                .await?;
            public_keys.push(signer.public_key.clone());
            signers_by_position.insert(slot.position, signer);
        }

        let active_slot = non_expired
            .iter()
            .filter(|s| !s.in_grace_period(now, self.params.grace_period))
            .max_by_key(|s| s.rotation_completed_at)
            .or_else(|| non_expired.iter().min_by_key(|s| s.rotation_completed_at))
            .copied();

        let active_signer = match active_slot {
            Some(slot) => signers_by_position
                .get(&slot.position)
                .cloned()
                .ok_or_else(|| ParsecError::Internal("active slot has no signer".into()))?,
            None => {
                return Err(ParsecError::Internal(
                    "no non-expired key slot available".into(),
                ))
            }
        };

        self.cache.store(Arc::new(ActiveKeyCache {
            signer: active_signer,
            public_keys,
        }));
        Ok(())
    }

    /// O(1), lock-free hot-path read of the current signer (§4.4, §5).
    pub fn get_current_signer(&self) -> Signer {
        self.cache.load().signer.clone()
    }

    /// O(1), lock-free hot-path read of the full non-expired verification
    /// key set (§4.4, §5). Every [`Signer`] returned by
    /// [`Self::get_current_signer`] has a `kid` present in this output
    /// (testable property, §8).
    pub fn public_keys(&self) -> Vec<PublicKey> {
        self.cache.load().public_keys.clone()
    }
}

fn dummy_public_key() -> PublicKey {
    use jsonwebtoken::jwk::{AlgorithmParameters, CommonParameters, Jwk, RSAKeyParameters, RSAKeyType};
    PublicKey {
        kid: "uninitialized".to_string(),
        algorithm: Algorithm::RS256,
        jwk: Jwk {
            common: CommonParameters::default(),
            algorithm: AlgorithmParameters::RSA(RSAKeyParameters {
                key_type: RSAKeyType::RSA,
                n: String::new(),
                e: String::new(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::keys::provider::RsaKeyProvider;
    use crate::keys::slot::InMemoryKeySlotStore;
    use chrono::Utc;

    fn test_params() -> RotationParams {
        RotationParams {
            key_ttl: Duration::minutes(30),
            rotation_threshold: Duration::minutes(8),
            grace_period: Duration::minutes(2),
            check_interval: Duration::minutes(1),
            prepare_timeout: Duration::minutes(1),
        }
    }

    async fn make_manager(clock: Arc<TestClock>) -> RotatingKeyManager {
        RotatingKeyManager::new(
            "transaction_token",
            "parsec.test",
            Algorithm::RS256,
            test_params(),
            Arc::new(InMemoryKeySlotStore::new()),
            Arc::new(RsaKeyProvider::new()),
            clock as Arc<dyn Clock>,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn startup_generates_slot_a_and_is_immediately_active() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let manager = make_manager(clock).await;

        let signer = manager.get_current_signer();
        let keys = manager.public_keys();
        assert!(keys.iter().any(|k| k.kid == signer.id));
    }

    #[tokio::test]
    async fn rotation_under_load_matches_scenario_4() {
        let start = Utc::now();
        let clock = Arc::new(TestClock::new(start));
        let manager = make_manager(clock.clone()).await;

        let initial_signer = manager.get_current_signer();

        // t = 22m + epsilon: rotation should produce slot B preparing -> complete.
        clock.advance(Duration::minutes(22) + Duration::seconds(5));
        manager.check_rotation_once().await.unwrap();

        // Still within slot B's grace period: slot A remains active.
        let signer_at_22 = manager.get_current_signer();
        assert_eq!(signer_at_22.id, initial_signer.id);
        assert_eq!(manager.public_keys().len(), 2);

        // t = 24m: grace period for slot B (2m after ~22m) has elapsed.
        clock.advance(Duration::minutes(2));
        manager.check_rotation_once().await.unwrap();
        let signer_at_24 = manager.get_current_signer();
        assert_ne!(signer_at_24.id, initial_signer.id);

        // t = 30m: slot A should now be expired and dropped from PublicKeys.
        clock.advance(Duration::minutes(6));
        manager.check_rotation_once().await.unwrap();
        assert_eq!(manager.public_keys().len(), 1);
    }

    #[tokio::test]
    async fn active_signer_kid_always_present_in_public_keys() {
        let clock = Arc::new(TestClock::new(Utc::now()));
        let manager = make_manager(clock.clone()).await;

        for _ in 0..5 {
            clock.advance(Duration::minutes(10));
            manager.check_rotation_once().await.unwrap();
            let signer = manager.get_current_signer();
            let keys = manager.public_keys();
            assert!(keys.iter().any(|k| k.kid == signer.id));
        }
    }

    #[test]
    fn invalid_params_are_rejected() {
        let params = RotationParams {
            key_ttl: Duration::minutes(10),
            rotation_threshold: Duration::minutes(20),
            grace_period: Duration::minutes(2),
            check_interval: Duration::minutes(1),
            prepare_timeout: Duration::minutes(1),
        };
        assert!(params.validate().is_err());
    }
}
