//! Shared counter store.
//!
//! [`CounterStore`] is the seam between the limiting algorithms in
//! [`StoreLimiter`](crate::StoreLimiter) and the storage that makes them
//! global across instances. [`RedisCounterStore`] is the production
//! implementation; tests use `mock::InMemoryCounterStore`.

pub mod lua_scripts;
mod redis;

pub use self::redis::RedisCounterStore;

use crate::errors::AdmissionError;
use async_trait::async_trait;
use std::time::Duration;

/// Contents of a sliding window after pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlidingSnapshot {
    /// Entries still inside the window.
    pub count: u64,
    /// Score (epoch millis) of the oldest remaining entry.
    pub oldest_ms: Option<i64>,
}

/// Parameters for one atomic token bucket take.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketParams {
    pub capacity: u64,
    pub refill_per_sec: f64,
    pub requested: u64,
    pub now_ms: i64,
    /// Idle buckets expire after this long.
    pub ttl: Duration,
}

/// Result of a token bucket take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketOutcome {
    pub allowed: bool,
    /// Whole tokens left after the take.
    pub remaining: u64,
}

/// Atomic counter operations the store-backed limiter needs.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment a window counter and return the new count.
    ///
    /// The expiry is set only when the counter is created, so a window is
    /// never extended by later hits.
    async fn increment_window(&self, key: &str, ttl: Duration) -> Result<u64, AdmissionError>;

    /// Drop entries scored at or below `cutoff_ms`, then count what is left.
    async fn sliding_snapshot(&self, key: &str, cutoff_ms: i64) -> Result<SlidingSnapshot, AdmissionError>;

    /// Record `members` at `score_ms` and refresh the key's expiry.
    async fn add_sliding(
        &self,
        key: &str,
        score_ms: i64,
        members: &[String],
        ttl: Duration,
    ) -> Result<(), AdmissionError>;

    /// Refill then take from a token bucket in one atomic step.
    async fn take_from_bucket(&self, key: &str, params: BucketParams) -> Result<BucketOutcome, AdmissionError>;

    /// Delete keys; missing keys are not an error.
    async fn delete(&self, keys: &[String]) -> Result<(), AdmissionError>;
}
