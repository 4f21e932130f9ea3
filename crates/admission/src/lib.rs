//! Admission control for the call-exchange realtime layer.
//!
//! Decides, for a key and a cost, whether an operation may proceed, and
//! reports quota metadata for `X-RateLimit-*` signaling. Independent of the
//! Hub; the HTTP middleware and the WebSocket reader both consult it.
//!
//! # Architecture
//!
//! ```text
//! AdmissionController (decorator, infallible)
//! ├── primary: StoreLimiter<S: CounterStore>   (shared store, cross-instance)
//! │   ├── check_limit           fixed 1s window (INCR + PEXPIRE on first hit)
//! │   ├── check_limit_with_cost sliding 1s window (sorted set)
//! │   ├── acquire_token         global token bucket (Lua, atomic)
//! │   └── reset                 delete window state
//! └── fallback: LocalLimiter                    (per-instance token buckets)
//! ```
//!
//! Any store error or timeout degrades the guarantee from "rate across all
//! instances" to "rate per instance"; it is logged and counted, never
//! surfaced to clients, and never blocks all traffic.
//!
//! # Modules
//!
//! - [`config`] - Limits, burst, fast-path threshold, store deadline
//! - [`controller`] - Fallback decorator
//! - [`decision`] - Allow/deny result with header metadata
//! - [`distributed`] - Store-backed limiter
//! - [`key`] - Key derivation strategies
//! - [`local`] - In-process token buckets
//! - [`store`] - Counter store trait and Redis implementation

pub mod clock;
pub mod config;
pub mod controller;
pub mod decision;
pub mod distributed;
pub mod errors;
pub mod key;
pub mod limiter;
pub mod local;
pub mod metrics;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use clock::{system_clock, Clock};
pub use config::RateLimitConfig;
pub use controller::AdmissionController;
pub use decision::{Decision, DecisionSource};
pub use distributed::StoreLimiter;
pub use errors::AdmissionError;
pub use key::{KeyContext, KeyStrategy, UnknownKeyComponent, GLOBAL_KEY};
pub use limiter::RateLimiter;
pub use local::{spawn_sweeper, LocalLimiter, TokenBucket};
pub use store::{BucketOutcome, BucketParams, CounterStore, RedisCounterStore, SlidingSnapshot};
