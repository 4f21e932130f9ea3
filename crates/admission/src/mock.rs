//! Test doubles: an in-memory [`CounterStore`] and a manually driven clock.
//!
//! Available under `cfg(test)` and the `test-utils` feature.

use crate::clock::Clock;
use crate::errors::AdmissionError;
use crate::store::{BucketOutcome, BucketParams, CounterStore, SlidingSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    counters: HashMap<String, u64>,
    ttls: HashMap<String, Duration>,
    sliding: HashMap<String, Vec<(i64, String)>>,
    buckets: HashMap<String, (f64, i64)>,
    latency: Duration,
}

/// In-memory counter store with an availability switch.
///
/// Keys never expire on their own; recorded TTLs can be inspected with
/// [`ttl_of`](Self::ttl_of).
#[derive(Debug, Clone)]
pub struct InMemoryCounterStore {
    inner: Arc<Mutex<Inner>>,
    available: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            available: Arc::new(AtomicBool::new(true)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every answer by `latency` (after the availability check).
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Number of store operations attempted, successful or not.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Current value of a window counter.
    #[must_use]
    pub fn counter(&self, key: &str) -> Option<u64> {
        self.lock().counters.get(key).copied()
    }

    /// Sum of every window counter whose key starts with `prefix`.
    #[must_use]
    pub fn counter_total(&self, prefix: &str) -> u64 {
        self.lock()
            .counters
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(_, count)| *count)
            .sum()
    }

    /// TTL most recently applied to `key`.
    #[must_use]
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.lock().ttls.get(key).copied()
    }

    /// Entries held in a sliding window.
    #[must_use]
    pub fn sliding_len(&self, key: &str) -> usize {
        self.lock().sliding.get(key).map_or(0, Vec::len)
    }

    /// Pre-populate a sliding window with `count` entries at `score_ms`.
    pub fn seed_sliding(&self, key: &str, score_ms: i64, count: usize) {
        let mut inner = self.lock();
        let entries = inner.sliding.entry(key.to_string()).or_default();
        for i in 0..count {
            entries.push((score_ms, format!("seed-{i}")));
        }
    }

    async fn begin(&self) -> Result<(), AdmissionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available.load(Ordering::SeqCst) {
            return Err(AdmissionError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment_window(&self, key: &str, ttl: Duration) -> Result<u64, AdmissionError> {
        self.begin().await?;
        let mut inner = self.lock();
        let count = inner.counters.entry(key.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        if count == 1 {
            inner.ttls.insert(key.to_string(), ttl);
        }
        Ok(count)
    }

    async fn sliding_snapshot(&self, key: &str, cutoff_ms: i64) -> Result<SlidingSnapshot, AdmissionError> {
        self.begin().await?;
        let mut inner = self.lock();
        let entries = inner.sliding.entry(key.to_string()).or_default();
        entries.retain(|(score, _)| *score > cutoff_ms);
        Ok(SlidingSnapshot {
            count: entries.len() as u64,
            oldest_ms: entries.iter().map(|(score, _)| *score).min(),
        })
    }

    async fn add_sliding(
        &self,
        key: &str,
        score_ms: i64,
        members: &[String],
        ttl: Duration,
    ) -> Result<(), AdmissionError> {
        self.begin().await?;
        let mut inner = self.lock();
        let entries = inner.sliding.entry(key.to_string()).or_default();
        entries.extend(members.iter().map(|m| (score_ms, m.clone())));
        inner.ttls.insert(key.to_string(), ttl);
        Ok(())
    }

    async fn take_from_bucket(&self, key: &str, params: BucketParams) -> Result<BucketOutcome, AdmissionError> {
        self.begin().await?;
        let mut inner = self.lock();

        #[allow(clippy::cast_precision_loss)]
        let capacity = params.capacity as f64;
        let (tokens, ts) = inner
            .buckets
            .get(key)
            .copied()
            .unwrap_or((capacity, params.now_ms));

        #[allow(clippy::cast_precision_loss)]
        let elapsed_ms = (params.now_ms - ts).max(0) as f64;
        let mut tokens = capacity.min(tokens + elapsed_ms * params.refill_per_sec / 1000.0);

        #[allow(clippy::cast_precision_loss)]
        let requested = params.requested as f64;
        let allowed = tokens >= requested;
        if allowed {
            tokens -= requested;
        }

        inner.buckets.insert(key.to_string(), (tokens, params.now_ms));
        inner.ttls.insert(key.to_string(), params.ttl);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let remaining = tokens.floor().max(0.0) as u64;
        Ok(BucketOutcome { allowed, remaining })
    }

    async fn delete(&self, keys: &[String]) -> Result<(), AdmissionError> {
        self.begin().await?;
        let mut inner = self.lock();
        for key in keys {
            inner.counters.remove(key);
            inner.ttls.remove(key);
            inner.sliding.remove(key);
            inner.buckets.remove(key);
        }
        Ok(())
    }
}

/// Wall clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    /// Start at `start_ms` Unix epoch milliseconds.
    #[must_use]
    pub fn new(start_ms: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    /// A [`Clock`] reading this clock.
    #[must_use]
    pub fn clock(&self) -> Clock {
        let millis = Arc::clone(&self.millis);
        Arc::new(move || {
            DateTime::<Utc>::from_timestamp_millis(millis.load(Ordering::SeqCst)).unwrap_or_default()
        })
    }

    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_store_errors_and_counts_calls() {
        let store = InMemoryCounterStore::new();
        store.set_available(false);

        let result = store.increment_window("k", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(AdmissionError::StoreUnavailable(_))));
        assert_eq!(store.call_count(), 1);

        store.set_available(true);
        assert_eq!(store.increment_window("k", Duration::from_secs(1)).await.unwrap(), 1);
        assert_eq!(store.call_count(), 2);
    }

    #[tokio::test]
    async fn test_sliding_snapshot_prunes_at_or_below_cutoff() {
        let store = InMemoryCounterStore::new();
        store.seed_sliding("s", 1000, 2);
        store.seed_sliding("s", 1500, 1);

        let snapshot = store.sliding_snapshot("s", 1000).await.unwrap();
        assert_eq!(snapshot.count, 1);
        assert_eq!(snapshot.oldest_ms, Some(1500));
        assert_eq!(store.sliding_len("s"), 1);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_700_000_000_000);
        let read = clock.clock();
        assert_eq!(read().timestamp_millis(), 1_700_000_000_000);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(read().timestamp_millis(), 1_700_000_001_500);

        clock.set(5);
        assert_eq!(clock.now_ms(), 5);
    }
}
