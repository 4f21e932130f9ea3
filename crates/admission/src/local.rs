//! In-process token bucket limiter.
//!
//! Used as the fallback when the shared store is unavailable and as the fast
//! path for very high limits. Buckets live in a sharded map so concurrent
//! callers on different keys never contend on a global lock. Enforcement is
//! per instance only.

use crate::clock::{system_clock, Clock};
use crate::config::RateLimitConfig;
use crate::decision::{clamp_u32, Decision, DecisionSource};
use crate::errors::AdmissionError;
use crate::limiter::RateLimiter;
use crate::metrics as admission_metrics;
use chrono::TimeDelta;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Local key used by [`RateLimiter::acquire_token`].
pub const GLOBAL_BUCKET_KEY: &str = "global:bucket";

/// Continuously refilling token bucket.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    last_used: Instant,
}

impl TokenBucket {
    /// New bucket, full.
    #[must_use]
    pub fn new(capacity: f64, refill_per_sec: f64, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: now,
            last_used: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = self.capacity.min(self.tokens + elapsed * self.refill_per_sec);
            self.last_refill = now;
        }
    }

    /// Refill, then take `cost` tokens if available.
    pub fn try_consume(&mut self, cost: f64, now: Instant) -> bool {
        self.refill(now);
        self.last_used = now;

        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Tokens currently held (as of the last refill).
    #[must_use]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Time until the bucket holds `needed` tokens.
    #[must_use]
    pub fn time_until(&self, needed: f64) -> Duration {
        let missing = (needed.min(self.capacity) - self.tokens).max(0.0);
        if missing == 0.0 {
            return Duration::ZERO;
        }
        if self.refill_per_sec <= 0.0 {
            return Duration::from_secs(1);
        }
        Duration::from_secs_f64(missing / self.refill_per_sec)
    }

    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }
}

/// Per-key token buckets sized from a [`RateLimitConfig`].
///
/// Per-key decisions report the window limit, the same figure the store
/// reports, with `remaining` capped at it. Global bucket decisions report
/// the bucket capacity.
pub struct LocalLimiter {
    buckets: DashMap<String, TokenBucket>,
    limit: u32,
    capacity: u32,
    refill_per_sec: f64,
    clock: Clock,
}

impl LocalLimiter {
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            limit: config.limit(),
            capacity: config.bucket_capacity(),
            refill_per_sec: f64::from(config.requests_per_second),
            clock: system_clock(),
        }
    }

    /// Replace the wall clock used for `reset_at`.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Take `cost` tokens from `key`'s bucket.
    pub fn consume(&self, key: &str, cost: u32) -> Decision {
        self.take(key, cost, self.limit)
    }

    /// Take from the bucket shared by every caller.
    pub fn consume_global(&self, tokens: u32) -> Decision {
        self.take(GLOBAL_BUCKET_KEY, tokens, self.capacity)
    }

    fn take(&self, key: &str, cost: u32, limit: u32) -> Decision {
        let now = Instant::now();
        let exceeds_limit = cost > limit;
        let cost = f64::from(cost);

        let (allowed, tokens, retry_after, until_full) = {
            let mut bucket = self
                .buckets
                .entry(key.to_string())
                .or_insert_with(|| TokenBucket::new(f64::from(self.capacity), self.refill_per_sec, now));
            let allowed = !exceeds_limit && bucket.try_consume(cost, now);
            let retry_after = if allowed || exceeds_limit {
                Duration::ZERO
            } else {
                bucket.time_until(cost)
            };
            (allowed, bucket.tokens(), retry_after, bucket.time_until(f64::INFINITY))
        };

        let reset_at = (self.clock)()
            + TimeDelta::from_std(until_full).unwrap_or(TimeDelta::zero());

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let remaining = clamp_u32(tokens.floor().max(0.0) as u64).min(limit);

        Decision {
            allowed,
            limit,
            remaining,
            reset_at,
            retry_after,
            exceeds_limit,
            source: DecisionSource::Local,
        }
    }

    /// Drop `key`'s bucket; the next request starts full.
    pub fn forget(&self, key: &str) {
        self.buckets.remove(key);
    }

    /// Remove buckets unused for at least `idle_after`. Returns how many.
    pub fn evict_idle(&self, idle_after: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = 0usize;
        self.buckets.retain(|_, bucket| {
            let keep = bucket.idle_for(now) < idle_after;
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[async_trait::async_trait]
impl RateLimiter for LocalLimiter {
    async fn check_limit(&self, key: &str) -> Result<Decision, AdmissionError> {
        Ok(self.consume(key, 1))
    }

    async fn check_limit_with_cost(&self, key: &str, cost: u32) -> Result<Decision, AdmissionError> {
        Ok(self.consume(key, cost.max(1)))
    }

    async fn acquire_token(&self, tokens: u32) -> Result<Decision, AdmissionError> {
        Ok(self.consume_global(tokens))
    }

    async fn reset(&self, key: &str) -> Result<(), AdmissionError> {
        self.forget(key);
        Ok(())
    }
}

/// Periodically evict idle buckets until `cancel_token` fires.
pub fn spawn_sweeper(
    limiter: Arc<LocalLimiter>,
    interval: Duration,
    idle_after: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!(target: "admission.fallback", "Local bucket sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = limiter.evict_idle(idle_after);
                    if evicted > 0 {
                        admission_metrics::record_local_evictions(evicted);
                        debug!(
                            target: "admission.fallback",
                            evicted = evicted,
                            remaining = limiter.len(),
                            "Evicted idle local buckets"
                        );
                    }
                }
            }
        }
    })
}
