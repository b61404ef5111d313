// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-photoacoustic project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Injectable clock capability.
//!
//! The rotation state machine, cache TTL buckets, and token `iat`/`exp`
//! claims all read time through this trait instead of calling
//! `chrono::Utc::now()` directly, so tests can drive them deterministically.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Capability for reading wall-clock time.
///
/// Implementations MUST be cheap to call and side-effect free beyond
/// whatever internal bookkeeping they choose (e.g. a test clock's counter).
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock whose value only changes when explicitly advanced.
///
/// Shared via `Arc` so a test can hold a handle, advance it, and have
/// every component that was given `Arc<dyn Clock>` observe the new time.
#[derive(Debug, Clone)]
pub struct TestClock {
    // Stored as epoch millis so the clock is cheaply `Clone`-able and
    // updatable from multiple threads without a mutex.
    epoch_millis: Arc<AtomicI64>,
}

impl TestClock {
    /// Creates a test clock fixed at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            epoch_millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    /// Moves the clock forward by `duration`. Negative durations are rejected
    /// by callers; the rotation loop and cache never need to rewind time.
    pub fn advance(&self, duration: chrono::Duration) {
        self.epoch_millis
            .fetch_add(duration.num_milliseconds(), Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, time: DateTime<Utc>) {
        self.epoch_millis
            .store(time.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.epoch_millis.load(Ordering::SeqCst))
            .unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_deterministically() {
        let start = Utc::now();
        let clock = TestClock::new(start);
        assert_eq!(clock.now().timestamp_millis(), start.timestamp_millis());

        clock.advance(chrono::Duration::hours(2));
        assert_eq!(
            clock.now().timestamp_millis(),
            (start + chrono::Duration::hours(2)).timestamp_millis()
        );
    }

    #[test]
    fn test_clock_clones_share_state() {
        let clock = TestClock::new(Utc::now());
        let handle = clock.clone();
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), handle.now());
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let t1 = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let t2 = clock.now();
        assert!(t2 >= t1);
    }
}
