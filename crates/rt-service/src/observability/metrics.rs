//! Metrics definitions for the realtime service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rt_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `scope`: topic, user
//! - `reason`: buffer_full, session_closed, liveness_timeout, client_closed, ...
//! - `type`: envelope types plus `invalid`
//! - `outcome`: granted/denied, accepted/rejected
//!
//! Topic names and user ids never appear as labels.

use crate::hub::BroadcastReport;
use axum::{extract::State, response::IntoResponse};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Sessions last from seconds to hours
        .set_buckets_for_metric(
            Matcher::Full("rt_session_duration_seconds".to_string()),
            &[
                1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 14400.0,
            ],
        )
        .map_err(|e| format!("Failed to set session duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Handler for `GET /metrics`.
#[tracing::instrument(skip_all, name = "rt.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}

// ============================================================================
// HTTP
// ============================================================================

/// Record one HTTP response.
///
/// Metric: `rt_http_requests_total`, `rt_http_request_duration_seconds`
/// Labels: `method`, `endpoint` (route template), `status_code`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    histogram!("rt_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rt_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

// ============================================================================
// Sessions
// ============================================================================

/// Metric: `rt_sessions_active`
pub fn set_sessions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rt_sessions_active").set(count as f64);
}

/// Metric: `rt_sessions_total`
pub fn record_session_opened() {
    counter!("rt_sessions_total").increment(1);
}

/// Record a finished session.
///
/// Metric: `rt_session_duration_seconds`, `rt_sessions_closed_total`
/// Labels: `reason`
pub fn record_session_closed(reason: &'static str, duration: Duration) {
    histogram!("rt_session_duration_seconds").record(duration.as_secs_f64());
    counter!("rt_sessions_closed_total", "reason" => reason).increment(1);
}

/// Metric: `rt_ws_upgrades_total`
/// Labels: `outcome` (accepted, unauthorized, rate_limited)
pub fn record_ws_upgrade(outcome: &'static str) {
    counter!("rt_ws_upgrades_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Hub
// ============================================================================

/// Metric: `rt_hub_mailbox_depth`
pub fn set_hub_mailbox_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rt_hub_mailbox_depth").set(depth as f64);
}

/// Record a completed fan-out.
///
/// Metric: `rt_broadcasts_total`, `rt_messages_delivered_total`
/// Labels: `scope` (topic, user)
pub fn record_broadcast(scope: &'static str, report: &BroadcastReport) {
    counter!("rt_broadcasts_total", "scope" => scope).increment(1);
    counter!("rt_messages_delivered_total", "scope" => scope).increment(report.delivered as u64);
}

/// Metric: `rt_messages_dropped_total`
/// Labels: `reason` (buffer_full, session_closed)
pub fn record_message_dropped(reason: &'static str) {
    counter!("rt_messages_dropped_total", "reason" => reason).increment(1);
}

/// Metric: `rt_subscriptions_total`
/// Labels: `outcome` (granted, denied)
pub fn record_subscription(granted: bool) {
    let outcome = if granted { "granted" } else { "denied" };
    counter!("rt_subscriptions_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Inbound
// ============================================================================

/// Metric: `rt_inbound_messages_total`
/// Labels: `type`
pub fn record_inbound_message(message_type: &'static str) {
    counter!("rt_inbound_messages_total", "type" => message_type).increment(1);
}

/// Metric: `rt_admission_rejections_total`
/// Labels: `surface` (http, ws_upgrade, ws_message)
pub fn record_admission_rejected(surface: &'static str) {
    counter!("rt_admission_rejections_total", "surface" => surface).increment(1);
}
