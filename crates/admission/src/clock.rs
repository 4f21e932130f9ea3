//! Wall-clock source for window arithmetic.
//!
//! Window keys and `reset_at` are derived from wall-clock time, which
//! `tokio::time::pause` does not control. Limiters take a [`Clock`] so tests
//! can pin the current instant.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Shared wall-clock source.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The real clock (`Utc::now`).
#[must_use]
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}
