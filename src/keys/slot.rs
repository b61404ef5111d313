// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Key-slot storage with compare-and-swap versioning (C3, §3, §4.4).

use crate::error::ParsecError;
use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The two rotation positions a (`token_type`, `trust_domain`) pair has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotPosition {
    A,
    B,
}

impl SlotPosition {
    /// The other slot in the pair.
    pub fn other(self) -> SlotPosition {
        match self {
            SlotPosition::A => SlotPosition::B,
            SlotPosition::B => SlotPosition::A,
        }
    }

    /// Key-provider key name for this slot, per the two-phase commit
    /// protocol's idempotent naming scheme (§4.4: `"key-a"` / `"key-b"`).
    pub fn key_name(self) -> &'static str {
        match self {
            SlotPosition::A => "key-a",
            SlotPosition::B => "key-b",
        }
    }
}

/// One rotation slot. A slot is idle (never used), preparing (key material
/// being generated), or complete (key material bound and usable) — see the
/// state machine in §4.4.
///
/// `generation` counts how many times this position has been rotated into:
/// it increments every time a new rotation targets this slot and is carried
/// unchanged from `Preparing` through `Complete`. Folded into the key
/// provider's key name (see [`Self::provider_key_name`]) so that rotating
/// back into a position that was used before generates fresh key material
/// instead of reusing the key retired the last time this position was
/// active — the provider's idempotency contract only promises the same key
/// material within one rotation, not across rotations that reuse a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySlot {
    pub position: SlotPosition,
    pub token_type: String,
    pub key_manager_id: String,
    pub preparing_at: Option<chrono::DateTime<chrono::Utc>>,
    pub rotation_completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub algorithm: Algorithm,
    #[serde(default)]
    pub generation: u64,
}

/// Derived state of a slot at a point in time, given `now` and `prepare_timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Preparing,
    Complete,
}

impl KeySlot {
    pub fn empty(position: SlotPosition, token_type: impl Into<String>, key_manager_id: impl Into<String>, algorithm: Algorithm) -> Self {
        Self {
            position,
            token_type: token_type.into(),
            key_manager_id: key_manager_id.into(),
            preparing_at: None,
            rotation_completed_at: None,
            algorithm,
            generation: 0,
        }
    }

    /// Key name passed to the [`crate::keys::KeyProvider`], unique per
    /// `(position, generation)` so each new rotation into a position mints
    /// fresh key material instead of returning what the provider cached the
    /// last time this position was used.
    pub fn provider_key_name(&self) -> String {
        format!("{}-g{}", self.position.key_name(), self.generation)
    }

    /// The slot's state as of `now`, accounting for a stuck `Preparing`
    /// state past `prepare_timeout` reverting to `Empty` for selection
    /// purposes (§4.4).
    pub fn state(&self, now: chrono::DateTime<chrono::Utc>, prepare_timeout: chrono::Duration) -> SlotState {
        match (self.preparing_at, self.rotation_completed_at) {
            (_, Some(completed)) if self.preparing_at.map_or(true, |p| p <= completed) => {
                let _ = completed;
                SlotState::Complete
            }
            (Some(preparing), _) => {
                if now - preparing > prepare_timeout {
                    SlotState::Empty
                } else {
                    SlotState::Preparing
                }
            }
            (None, None) => SlotState::Empty,
        }
    }

    /// True when, as of `now`, the slot's key has aged past `key_ttl` since
    /// completion and should be dropped from verification output (§4.4).
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>, key_ttl: chrono::Duration) -> bool {
        match self.rotation_completed_at {
            Some(completed) => now - completed >= key_ttl,
            None => false,
        }
    }

    /// True when the slot is still within its grace period (published for
    /// verification, not yet eligible to sign).
    pub fn in_grace_period(&self, now: chrono::DateTime<chrono::Utc>, grace_period: chrono::Duration) -> bool {
        match self.rotation_completed_at {
            Some(completed) => now - completed < grace_period,
            None => false,
        }
    }
}

/// Persists rotation state for a (`token_type`, `trust_domain`) pair with
/// linearizable compare-and-swap versioning (§3, §6).
#[async_trait]
pub trait KeySlotStore: Send + Sync {
    /// Reads both slots and the current store version.
    async fn load(&self, token_type: &str, trust_domain: &str) -> Result<(Option<KeySlot>, Option<KeySlot>, u64), ParsecError>;

    /// Writes both slots, requiring `expected_version` to match the current
    /// stored version. Returns the new version on success, or
    /// [`ParsecError::RotationContested`] on mismatch.
    async fn save(
        &self,
        token_type: &str,
        trust_domain: &str,
        slot_a: Option<KeySlot>,
        slot_b: Option<KeySlot>,
        expected_version: u64,
    ) -> Result<u64, ParsecError>;
}

struct VersionedSlots {
    slot_a: Option<KeySlot>,
    slot_b: Option<KeySlot>,
    version: u64,
}

/// In-memory [`KeySlotStore`]. State is lost on restart and there is no
/// multi-process coordination; a persistent store with atomic CAS is
/// required for high availability (§9 open question — documented as-is,
/// not addressed by this implementation).
#[derive(Default)]
pub struct InMemoryKeySlotStore {
    entries: DashMap<(String, String), VersionedSlots>,
    // Monotonic counter used only to make version allocation independent of
    // per-key state so concurrent keys never collide on a version number.
    version_source: AtomicU64,
}

impl InMemoryKeySlotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeySlotStore for InMemoryKeySlotStore {
    async fn load(&self, token_type: &str, trust_domain: &str) -> Result<(Option<KeySlot>, Option<KeySlot>, u64), ParsecError> {
        let key = (token_type.to_string(), trust_domain.to_string());
        match self.entries.get(&key) {
            Some(entry) => Ok((entry.slot_a.clone(), entry.slot_b.clone(), entry.version)),
            None => Ok((None, None, 0)),
        }
    }

    async fn save(
        &self,
        token_type: &str,
        trust_domain: &str,
        slot_a: Option<KeySlot>,
        slot_b: Option<KeySlot>,
        expected_version: u64,
    ) -> Result<u64, ParsecError> {
        let key = (token_type.to_string(), trust_domain.to_string());
        let new_version = self.version_source.fetch_add(1, Ordering::SeqCst) + 1;

        let mut entry = self.entries.entry(key).or_insert_with(|| VersionedSlots {
            slot_a: None,
            slot_b: None,
            version: 0,
        });

        if entry.version != expected_version {
            return Err(ParsecError::RotationContested);
        }

        entry.slot_a = slot_a;
        entry.slot_b = slot_b;
        entry.version = new_version;
        Ok(new_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cas_save_rejects_stale_version() {
        let store = InMemoryKeySlotStore::new();
        let slot = KeySlot::empty(SlotPosition::A, "transaction_token", "td", Algorithm::RS256);

        let v1 = store
            .save("transaction_token", "td", Some(slot.clone()), None, 0)
            .await
            .unwrap();
        assert_eq!(v1, 1);

        // Stale caller still thinks version is 0.
        let result = store
            .save("transaction_token", "td", Some(slot.clone()), None, 0)
            .await;
        assert!(matches!(result, Err(ParsecError::RotationContested)));

        // Correct version succeeds.
        let v2 = store
            .save("transaction_token", "td", Some(slot), None, v1)
            .await
            .unwrap();
        assert_eq!(v2, 2);
    }

    #[tokio::test]
    async fn only_one_of_two_racers_wins_same_version() {
        let store = Arc::new(InMemoryKeySlotStore::new());
        let slot = KeySlot::empty(SlotPosition::B, "transaction_token", "td", Algorithm::RS256);

        let (_, _, v) = store.load("transaction_token", "td").await.unwrap();

        let s1 = store.clone();
        let s2 = store.clone();
        let slot1 = slot.clone();
        let slot2 = slot.clone();

        let (r1, r2) = tokio::join!(
            s1.save("transaction_token", "td", Some(slot1), None, v),
            s2.save("transaction_token", "td", Some(slot2), None, v)
        );

        let successes = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn preparing_state_reverts_to_empty_after_timeout() {
        let now = chrono::Utc::now();
        let mut slot = KeySlot::empty(SlotPosition::A, "t", "td", Algorithm::RS256);
        slot.preparing_at = Some(now - chrono::Duration::minutes(5));

        assert_eq!(
            slot.state(now, chrono::Duration::minutes(1)),
            SlotState::Empty
        );
        assert_eq!(
            slot.state(now, chrono::Duration::minutes(10)),
            SlotState::Preparing
        );
    }
}
