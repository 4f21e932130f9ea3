//! The limiter seam shared by the store-backed and local implementations.

use crate::decision::Decision;
use crate::errors::AdmissionError;

/// Rate limiter operations.
///
/// [`StoreLimiter`](crate::StoreLimiter) may fail when the shared store is
/// unreachable; [`LocalLimiter`](crate::LocalLimiter) never does.
/// [`AdmissionController`](crate::AdmissionController) composes the two.
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    /// Fixed one-second window, cost 1.
    async fn check_limit(&self, key: &str) -> Result<Decision, AdmissionError>;

    /// Sliding one-second window with a caller-supplied cost.
    async fn check_limit_with_cost(&self, key: &str, cost: u32) -> Result<Decision, AdmissionError>;

    /// Take `tokens` from the bucket shared by every caller.
    async fn acquire_token(&self, tokens: u32) -> Result<Decision, AdmissionError>;

    /// Clear all window state for `key`.
    async fn reset(&self, key: &str) -> Result<(), AdmissionError>;
}
