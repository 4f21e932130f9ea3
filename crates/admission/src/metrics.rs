//! Admission metrics.
//!
//! Labels are bounded by code:
//! - `operation`: check_limit, check_limit_with_cost, acquire_token, reset
//! - `path`: store, local
//! - `outcome`: allowed, denied
//! - `error_type`: [`AdmissionError::kind`](crate::AdmissionError::kind)

use crate::decision::DecisionSource;
use metrics::counter;

/// Record an admission decision.
///
/// Metric: `admission_decisions_total`
/// Labels: `operation`, `path`, `outcome`
pub fn record_decision(operation: &'static str, source: DecisionSource, allowed: bool) {
    let outcome = if allowed { "allowed" } else { "denied" };
    counter!("admission_decisions_total",
        "operation" => operation,
        "path" => source.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a store failure that was answered by the local limiter.
///
/// Metric: `admission_store_fallbacks_total`
/// Labels: `operation`, `error_type`
pub fn record_store_fallback(operation: &'static str, error_type: &'static str) {
    counter!("admission_store_fallbacks_total",
        "operation" => operation,
        "error_type" => error_type
    )
    .increment(1);
}

/// Record idle local buckets removed by the sweeper.
///
/// Metric: `admission_local_buckets_evicted_total`
pub fn record_local_evictions(count: usize) {
    counter!("admission_local_buckets_evicted_total").increment(count as u64);
}
