//! Observability: Prometheus metrics and health probes.
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Tokens never appear in logs or labels; user ids appear in logs only.

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
