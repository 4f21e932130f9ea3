//! Admission controller: store-backed limiting with a local fallback.
//!
//! The controller never fails. When the primary limiter errors (store down,
//! timeout, garbage reply) the error is logged and counted, and the local
//! limiter answers instead. Enforcement then degrades from "rate across all
//! instances" to "rate per instance" until the store recovers.
//!
//! For limits at or above the fast-path threshold the local limiter is asked
//! first. A local allow is final; a local deny still goes to the store, and
//! only a store deny (or store failure) is returned to the caller.

use crate::config::RateLimitConfig;
use crate::decision::Decision;
use crate::distributed::StoreLimiter;
use crate::errors::AdmissionError;
use crate::limiter::RateLimiter;
use crate::local::LocalLimiter;
use crate::metrics as admission_metrics;
use crate::store::CounterStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

const OP_CHECK_LIMIT: &str = "check_limit";
const OP_CHECK_LIMIT_WITH_COST: &str = "check_limit_with_cost";
const OP_ACQUIRE_TOKEN: &str = "acquire_token";

type PrimaryFuture<'a> = Pin<Box<dyn Future<Output = Result<Decision, AdmissionError>> + Send + 'a>>;

/// Fallback decorator around a primary [`RateLimiter`].
#[derive(Clone)]
pub struct AdmissionController {
    primary: Arc<dyn RateLimiter>,
    fallback: Arc<LocalLimiter>,
    fast_path: bool,
}

impl AdmissionController {
    /// Compose `primary` with `fallback`, using `config` for the fast path.
    #[must_use]
    pub fn new(primary: Arc<dyn RateLimiter>, fallback: Arc<LocalLimiter>, config: &RateLimitConfig) -> Self {
        Self {
            primary,
            fallback,
            fast_path: config.uses_fast_path(),
        }
    }

    /// Store-backed controller with a local fallback sized from `config`.
    #[must_use]
    pub fn with_store<S: CounterStore + 'static>(store: Arc<S>, config: RateLimitConfig) -> Self {
        let fallback = Arc::new(LocalLimiter::new(&config));
        let fast_path = config.uses_fast_path();
        Self {
            primary: Arc::new(StoreLimiter::new(store, config)),
            fallback,
            fast_path,
        }
    }

    /// The local limiter, for the idle-bucket sweeper.
    #[must_use]
    pub fn local_limiter(&self) -> &Arc<LocalLimiter> {
        &self.fallback
    }

    /// Fixed one-second window for `key`.
    pub async fn check_limit(&self, key: &str) -> Decision {
        self.decide(OP_CHECK_LIMIT, key, self.primary.check_limit(key), || {
            self.fallback.consume(key, 1)
        })
        .await
    }

    /// Sliding one-second window for `key`, charging `cost` (0 counts as 1).
    pub async fn check_limit_with_cost(&self, key: &str, cost: u32) -> Decision {
        let cost = cost.max(1);
        self.decide(
            OP_CHECK_LIMIT_WITH_COST,
            key,
            self.primary.check_limit_with_cost(key, cost),
            || self.fallback.consume(key, cost),
        )
        .await
    }

    /// Take `tokens` from the global bucket.
    pub async fn acquire_token(&self, tokens: u32) -> Decision {
        self.decide(
            OP_ACQUIRE_TOKEN,
            "global",
            self.primary.acquire_token(tokens),
            || self.fallback.consume_global(tokens.max(1)),
        )
        .await
    }

    /// Clear window state for `key`.
    ///
    /// The local bucket is always cleared; the store part may fail.
    ///
    /// # Errors
    ///
    /// Returns the store error if the shared windows could not be deleted.
    pub async fn reset(&self, key: &str) -> Result<(), AdmissionError> {
        self.fallback.forget(key);
        self.primary.reset(key).await.map_err(|e| {
            warn!(
                target: "admission.fallback",
                error = %e,
                key = %key,
                "Failed to reset shared rate limit state"
            );
            e
        })
    }

    async fn decide<'a, L>(
        &self,
        operation: &'static str,
        key: &str,
        primary: PrimaryFuture<'a>,
        local: L,
    ) -> Decision
    where
        L: Fn() -> Decision,
    {
        let local_first = if self.fast_path {
            let decision = local();
            if decision.allowed {
                admission_metrics::record_decision(operation, decision.source, true);
                return decision;
            }
            debug!(
                target: "admission.fallback",
                key = %key,
                operation = operation,
                "Fast path denied, consulting store"
            );
            Some(decision)
        } else {
            None
        };

        let decision = match primary.await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    target: "admission.fallback",
                    error = %e,
                    error_type = e.kind(),
                    key = %key,
                    operation = operation,
                    "Store unavailable, using local limiter"
                );
                admission_metrics::record_store_fallback(operation, e.kind());
                // A fast-path denial already charged the local bucket
                local_first.unwrap_or_else(&local)
            }
        };

        if decision.exceeds_limit {
            warn!(
                target: "admission.fallback",
                key = %key,
                operation = operation,
                limit = decision.limit,
                "Request exceeds the configured limit and can never be admitted"
            );
        }

        admission_metrics::record_decision(operation, decision.source, decision.allowed);
        decision
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::decision::DecisionSource;
    use crate::mock::{InMemoryCounterStore, ManualClock};
    use std::time::Duration;

    // Pinned mid-window so consecutive calls never straddle a second boundary
    fn controller(rps: u32, burst: u32) -> (AdmissionController, Arc<InMemoryCounterStore>) {
        let store = Arc::new(InMemoryCounterStore::new());
        let config = RateLimitConfig::new(rps, burst);
        let clock = ManualClock::new(1_700_000_000_500);
        let primary = StoreLimiter::new(Arc::clone(&store), config.clone()).with_clock(clock.clock());
        let controller = AdmissionController::new(
            Arc::new(primary),
            Arc::new(LocalLimiter::new(&config)),
            &config,
        );
        (controller, store)
    }

    #[tokio::test]
    async fn test_healthy_store_answers() {
        let (controller, store) = controller(10, 10);
        let decision = controller.check_limit("k").await;
        assert!(decision.allowed);
        assert_eq!(decision.source, DecisionSource::Store);
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_falls_back_then_resumes() {
        let (controller, store) = controller(3, 3);

        store.set_available(false);
        for _ in 0..3 {
            let decision = controller.check_limit("k").await;
            assert!(decision.allowed);
            assert_eq!(decision.source, DecisionSource::Local);
        }
        // Local bucket still enforces the rate per instance
        let denied = controller.check_limit("k").await;
        assert!(!denied.allowed);
        assert_eq!(denied.source, DecisionSource::Local);

        store.set_available(true);
        let decision = controller.check_limit("k").await;
        assert!(decision.allowed);
        assert_eq!(decision.source, DecisionSource::Store);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reported_limit_is_stable_across_fallback() {
        let (controller, store) = controller(100, 200);

        let from_store = controller.check_limit("k").await;
        assert_eq!(from_store.source, DecisionSource::Store);

        store.set_available(false);
        let from_local = controller.check_limit("k").await;
        assert_eq!(from_local.source, DecisionSource::Local);

        assert_eq!(from_store.limit, 100);
        assert_eq!(from_local.limit, from_store.limit);
        assert!(from_local.remaining <= from_local.limit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cost_above_limit_denied_for_good_on_both_paths() {
        let (controller, store) = controller(5, 10);

        let from_store = controller.check_limit_with_cost("k", 6).await;
        assert!(!from_store.allowed);
        assert!(from_store.exceeds_limit);

        store.set_available(false);
        let from_local = controller.check_limit_with_cost("k", 6).await;
        assert!(!from_local.allowed);
        assert!(from_local.exceeds_limit);
        assert_eq!(from_local.retry_after_secs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_falls_back() {
        let store = Arc::new(InMemoryCounterStore::new());
        store.set_latency(Duration::from_secs(5));
        let config = RateLimitConfig::new(10, 10).with_store_timeout(Duration::from_millis(50));
        let controller = AdmissionController::with_store(Arc::clone(&store), config);

        let decision = controller.acquire_token(1).await;
        assert!(decision.allowed);
        assert_eq!(decision.source, DecisionSource::Local);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_path_skips_store_while_local_allows() {
        let (controller, store) = controller(2000, 2000);

        for _ in 0..100 {
            let decision = controller.check_limit("k").await;
            assert!(decision.allowed);
            assert_eq!(decision.source, DecisionSource::Local);
        }
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_path_denial_consults_store() {
        let store = Arc::new(InMemoryCounterStore::new());
        let config = RateLimitConfig::new(5, 5).with_fast_path_threshold(1);
        let controller = AdmissionController::with_store(Arc::clone(&store), config);

        for _ in 0..5 {
            assert!(controller.check_limit("k").await.allowed);
        }
        assert_eq!(store.call_count(), 0);

        // Local bucket is empty; the store has seen nothing and allows
        let decision = controller.check_limit("k").await;
        assert!(decision.allowed);
        assert_eq!(decision.source, DecisionSource::Store);
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_path_denial_with_store_down_is_denied() {
        let store = Arc::new(InMemoryCounterStore::new());
        let config = RateLimitConfig::new(1, 1).with_fast_path_threshold(1);
        let controller = AdmissionController::with_store(Arc::clone(&store), config);
        store.set_available(false);

        assert!(controller.check_limit("k").await.allowed);
        let denied = controller.check_limit("k").await;
        assert!(!denied.allowed);
        assert_eq!(denied.source, DecisionSource::Local);
    }

    #[tokio::test]
    async fn test_check_limit_with_cost_zero_counts_as_one() {
        let (controller, _store) = controller(5, 5);
        let decision = controller.check_limit_with_cost("k", 0).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_local_even_when_store_down() {
        let (controller, store) = controller(1, 1);
        store.set_available(false);
        assert!(controller.check_limit("k").await.allowed);
        assert!(!controller.check_limit("k").await.allowed);

        assert!(controller.reset("k").await.is_err());
        assert!(controller.check_limit("k").await.allowed);
    }

    #[tokio::test]
    async fn test_reset_with_store_up() {
        let (controller, _store) = controller(1, 1);
        assert!(controller.check_limit("k").await.allowed);
        assert!(!controller.check_limit("k").await.allowed);

        controller.reset("k").await.unwrap();
        assert!(controller.check_limit("k").await.allowed);
    }
}
