//! Admission decision and the quota metadata it carries.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Which limiter produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// The shared store (global across instances).
    Store,
    /// The in-process limiter (fallback or fast path).
    Local,
}

impl DecisionSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::Store => "store",
            DecisionSource::Local => "local",
        }
    }
}

/// Result of an admission check.
///
/// Maps onto `X-RateLimit-Limit`, `X-RateLimit-Remaining`,
/// `X-RateLimit-Reset` and, on denial, `Retry-After`.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    /// Clamped at zero.
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Zero when allowed.
    pub retry_after: Duration,
    /// The request asked for more than the limit (or bucket capacity) and
    /// can never be admitted; there is nothing to wait for.
    pub exceeds_limit: bool,
    pub source: DecisionSource,
}

impl Decision {
    /// `Retry-After` in whole seconds, rounded up; at least 1 when denied.
    ///
    /// Zero for allowed decisions and for requests that exceed the limit,
    /// which no amount of waiting will admit.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        if self.allowed || self.exceeds_limit {
            return 0;
        }
        let secs = self.retry_after.as_secs();
        let rounded = if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        };
        rounded.max(1)
    }

    /// `X-RateLimit-Reset` as Unix epoch seconds.
    #[must_use]
    pub fn reset_epoch_secs(&self) -> i64 {
        self.reset_at.timestamp()
    }
}

/// Clamp a `u64` count into the `u32` header range.
pub(crate) fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
