//! HTTP middleware.
//!
//! - `auth` - credential resolution and admin authorization
//! - `rate_limit` - admission control with `X-RateLimit-*` headers
//! - `http_metrics` - request counters and latency for every response

pub mod auth;
pub mod http_metrics;
pub mod rate_limit;

pub use auth::{require_admin, resolve_identity, AuthState, IdentityExt};
pub use http_metrics::http_metrics_middleware;
pub use rate_limit::{enforce as enforce_rate_limit, RateLimitState};
