//! Rate limit configuration.

use std::time::Duration;

/// Default prefix for every key written to the shared store.
pub const DEFAULT_KEY_PREFIX: &str = "ratelimit";

/// Limits at or above this many requests per second consult the local
/// limiter before the store.
pub const DEFAULT_FAST_PATH_THRESHOLD: u32 = 1000;

/// Default deadline for a single store operation.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(100);

/// Limits shared by the store-backed and local limiters.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Window limit (fixed and sliding) and token refill rate.
    pub requests_per_second: u32,
    /// Token bucket capacity.
    pub burst: u32,
    /// Prefix for store keys.
    pub key_prefix: String,
    /// Fast-path threshold; 0 disables the fast path.
    pub fast_path_threshold: u32,
    /// Deadline for each store operation before falling back.
    pub store_timeout: Duration,
}

impl RateLimitConfig {
    #[must_use]
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        Self {
            requests_per_second,
            burst,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            fast_path_threshold: DEFAULT_FAST_PATH_THRESHOLD,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_fast_path_threshold(mut self, threshold: u32) -> Self {
        self.fast_path_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Per-window request limit.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.requests_per_second
    }

    /// Token bucket capacity; never smaller than one second of traffic.
    #[must_use]
    pub fn bucket_capacity(&self) -> u32 {
        self.burst.max(self.requests_per_second)
    }

    /// Whether the local limiter answers first.
    #[must_use]
    pub fn uses_fast_path(&self) -> bool {
        self.fast_path_threshold > 0 && self.requests_per_second >= self.fast_path_threshold
    }
}
