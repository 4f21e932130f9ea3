//! Store-backed limiter.
//!
//! Every decision is made against the shared [`CounterStore`], so the limit
//! holds across all instances. Each store call is bounded by
//! [`RateLimitConfig::store_timeout`]; a timeout surfaces as
//! [`AdmissionError::Timeout`] and is handled like any other store failure.
//!
//! # Store keys
//!
//! - fixed window: `{prefix}:{key}:fixed:{epoch_second}`
//! - sliding window: `{prefix}:{key}:sliding`
//! - global bucket: `{prefix}:global:bucket`

use crate::clock::{system_clock, Clock};
use crate::config::RateLimitConfig;
use crate::decision::{clamp_u32, Decision, DecisionSource};
use crate::errors::AdmissionError;
use crate::limiter::RateLimiter;
use crate::store::{BucketParams, CounterStore};
use chrono::{DateTime, TimeDelta, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Fixed and sliding window length.
const WINDOW: Duration = Duration::from_secs(1);
const WINDOW_MS: i64 = 1000;

/// Idle global buckets are kept at least this long.
const MIN_BUCKET_TTL: Duration = Duration::from_secs(1);

fn to_std(delta: TimeDelta) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Limiter whose state lives in a shared [`CounterStore`].
pub struct StoreLimiter<S> {
    store: Arc<S>,
    config: RateLimitConfig,
    clock: Clock,
}

impl<S: CounterStore> StoreLimiter<S> {
    #[must_use]
    pub fn new(store: Arc<S>, config: RateLimitConfig) -> Self {
        Self {
            store,
            config,
            clock: system_clock(),
        }
    }

    /// Replace the wall clock that selects windows.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn fixed_key(&self, key: &str, window_secs: i64) -> String {
        format!("{}:{key}:fixed:{window_secs}", self.config.key_prefix)
    }

    fn sliding_key(&self, key: &str) -> String {
        format!("{}:{key}:sliding", self.config.key_prefix)
    }

    fn bucket_key(&self) -> String {
        format!("{}:global:bucket", self.config.key_prefix)
    }

    /// Bucket TTL: twice the time to refill from empty.
    fn bucket_ttl(&self) -> Duration {
        let rate = f64::from(self.config.requests_per_second);
        if rate <= 0.0 {
            return Duration::from_secs(60);
        }
        let refill = Duration::from_secs_f64(f64::from(self.config.bucket_capacity()) / rate);
        (refill * 2).max(MIN_BUCKET_TTL)
    }

    /// Run a store operation under the configured deadline.
    async fn bounded<T, F>(&self, operation: F) -> Result<T, AdmissionError>
    where
        F: Future<Output = Result<T, AdmissionError>>,
    {
        let deadline = self.config.store_timeout;
        match tokio::time::timeout(deadline, operation).await {
            Ok(result) => result,
            Err(_) => Err(AdmissionError::Timeout(deadline)),
        }
    }
}

#[async_trait::async_trait]
impl<S: CounterStore + 'static> RateLimiter for StoreLimiter<S> {
    #[instrument(skip_all, fields(key = %key))]
    async fn check_limit(&self, key: &str) -> Result<Decision, AdmissionError> {
        let now = (self.clock)();
        let window = now.timestamp();
        let store_key = self.fixed_key(key, window);

        let count = self.bounded(self.store.increment_window(&store_key, WINDOW)).await?;

        let limit = self.config.limit();
        let allowed = count <= u64::from(limit);
        let exceeds_limit = limit == 0;
        let reset_at = DateTime::<Utc>::from_timestamp(window + 1, 0).unwrap_or_default();
        let retry_after = if allowed || exceeds_limit {
            Duration::ZERO
        } else {
            to_std(reset_at - now)
        };

        Ok(Decision {
            allowed,
            limit,
            remaining: clamp_u32(u64::from(limit).saturating_sub(count)),
            reset_at,
            retry_after,
            exceeds_limit,
            source: DecisionSource::Store,
        })
    }

    #[instrument(skip_all, fields(key = %key, cost = cost))]
    async fn check_limit_with_cost(&self, key: &str, cost: u32) -> Result<Decision, AdmissionError> {
        let cost = u64::from(cost.max(1));
        let now_ms = (self.clock)().timestamp_millis();
        let store_key = self.sliding_key(key);

        let snapshot = self
            .bounded(self.store.sliding_snapshot(&store_key, now_ms - WINDOW_MS))
            .await?;

        let limit = self.config.limit();
        let allowed = snapshot.count + cost <= u64::from(limit);
        let exceeds_limit = cost > u64::from(limit);

        let used = if allowed {
            let members: Vec<String> = (0..cost)
                .map(|_| format!("{now_ms}:{}", Uuid::new_v4()))
                .collect();
            self.bounded(self.store.add_sliding(&store_key, now_ms, &members, WINDOW))
                .await?;
            snapshot.count + cost
        } else {
            debug!(
                target: "admission.store",
                in_window = snapshot.count,
                "Sliding window would exceed limit"
            );
            snapshot.count
        };

        // The window frees up when its oldest entry ages out
        let oldest_ms = snapshot.oldest_ms.unwrap_or(now_ms);
        let reset_ms = oldest_ms + WINDOW_MS;
        let retry_after = if allowed || exceeds_limit {
            Duration::ZERO
        } else {
            Duration::from_millis(u64::try_from(reset_ms - now_ms).unwrap_or(0))
        };

        Ok(Decision {
            allowed,
            limit,
            remaining: clamp_u32(u64::from(limit).saturating_sub(used)),
            reset_at: from_millis(reset_ms),
            retry_after,
            exceeds_limit,
            source: DecisionSource::Store,
        })
    }

    #[instrument(skip_all, fields(tokens = tokens))]
    async fn acquire_token(&self, tokens: u32) -> Result<Decision, AdmissionError> {
        let now = (self.clock)();
        let requested = u64::from(tokens.max(1));
        let capacity = self.config.bucket_capacity();
        let rate = f64::from(self.config.requests_per_second);

        let params = BucketParams {
            capacity: u64::from(capacity),
            refill_per_sec: rate,
            requested,
            now_ms: now.timestamp_millis(),
            ttl: self.bucket_ttl(),
        };
        let outcome = self
            .bounded(self.store.take_from_bucket(&self.bucket_key(), params))
            .await?;

        #[allow(clippy::cast_precision_loss)]
        let seconds_for = |missing: u64| {
            if rate <= 0.0 {
                WINDOW
            } else {
                Duration::from_secs_f64(missing as f64 / rate)
            }
        };

        let exceeds_limit = requested > u64::from(capacity);
        let retry_after = if outcome.allowed || exceeds_limit {
            Duration::ZERO
        } else {
            seconds_for(requested.saturating_sub(outcome.remaining))
        };
        let until_full = seconds_for(u64::from(capacity).saturating_sub(outcome.remaining));

        Ok(Decision {
            allowed: outcome.allowed,
            limit: capacity,
            remaining: clamp_u32(outcome.remaining),
            reset_at: now + TimeDelta::from_std(until_full).unwrap_or(TimeDelta::zero()),
            retry_after,
            exceeds_limit,
            source: DecisionSource::Store,
        })
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn reset(&self, key: &str) -> Result<(), AdmissionError> {
        let window = (self.clock)().timestamp();
        let keys = [
            self.fixed_key(key, window),
            self.fixed_key(key, window - 1),
            self.sliding_key(key),
        ];
        self.bounded(self.store.delete(&keys)).await?;

        debug!(target: "admission.store", key = %key, "Reset rate limit windows");
        Ok(())
    }
}
