//! Audit trail for administrative actions.
//!
//! Every admin/internal HTTP action is recorded through an injected
//! [`IntegrityService`] before the response is returned. A recording failure
//! is logged but does not fail the action.

use crate::auth::Identity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// An administrative action and its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdminAction {
    BroadcastToTopic { topic: String, event: String, delivered: usize },
    SendToUser { user_id: String, event: String, delivered: usize },
    ResetRateLimit { key: String },
}

impl AdminAction {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            AdminAction::BroadcastToTopic { .. } => "broadcast_to_topic",
            AdminAction::SendToUser { .. } => "send_to_user",
            AdminAction::ResetRateLimit { .. } => "reset_rate_limit",
        }
    }
}

/// One audit entry.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub actor_id: String,
    pub action: AdminAction,
    pub at: DateTime<Utc>,
}

impl AuditRecord {
    #[must_use]
    pub fn new(actor: &Identity, action: AdminAction) -> Self {
        Self {
            actor_id: actor.user_id.to_string(),
            action,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
#[error("audit record rejected: {0}")]
pub struct IntegrityError(pub String);

/// Sink for audit records.
#[async_trait]
pub trait IntegrityService: Send + Sync {
    /// # Errors
    ///
    /// Returns `IntegrityError` if the record could not be persisted.
    async fn record(&self, record: AuditRecord) -> Result<(), IntegrityError>;
}

/// Writes audit records to the `rt.audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingIntegrityService;

#[async_trait]
impl IntegrityService for TracingIntegrityService {
    async fn record(&self, record: AuditRecord) -> Result<(), IntegrityError> {
        let detail =
            serde_json::to_string(&record.action).map_err(|e| IntegrityError(e.to_string()))?;
        info!(
            target: "rt.audit",
            actor_id = %record.actor_id,
            action = record.action.name(),
            at = %record.at.to_rfc3339(),
            detail = %detail,
            "Admin action"
        );
        Ok(())
    }
}
