//! Admin and internal endpoints.
//!
//! All routes here sit behind `require_admin`; the caller's [`Identity`] is
//! available as a request extension. Each state-changing action is recorded
//! through the [`IntegrityService`](crate::integrity::IntegrityService).

use crate::auth::Identity;
use crate::errors::RtError;
use crate::hub::BroadcastReport;
use crate::integrity::{AdminAction, AuditRecord};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub event: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl PublishRequest {
    fn validate(&self) -> Result<(), RtError> {
        if self.event.trim().is_empty() {
            return Err(RtError::BadRequest("event must not be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct SubscriberCount {
    pub topic: String,
    pub subscribers: usize,
}

/// `POST /v1/internal/topics/:topic/events`
#[instrument(skip_all, name = "rt.admin.broadcast")]
pub async fn broadcast_to_topic(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(topic): Path<String>,
    Json(body): Json<PublishRequest>,
) -> Result<Json<BroadcastReport>, RtError> {
    body.validate()?;

    let report = state.hub.broadcast(&topic, &body.event, body.data).await?;
    info!(
        target: "rt.admin",
        actor_id = %identity.user_id,
        topic = %topic,
        event = %body.event,
        delivered = report.delivered,
        dropped = report.dropped,
        "Broadcast to topic"
    );

    audit(
        &state,
        &identity,
        AdminAction::BroadcastToTopic {
            topic,
            event: body.event,
            delivered: report.delivered,
        },
    )
    .await;
    Ok(Json(report))
}

/// `POST /v1/internal/users/:user_id/events`
#[instrument(skip_all, name = "rt.admin.send_to_user")]
pub async fn send_to_user(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(user_id): Path<String>,
    Json(body): Json<PublishRequest>,
) -> Result<Json<BroadcastReport>, RtError> {
    body.validate()?;

    let target = UserId::from(user_id);
    let report = state.hub.send_to_user(&target, &body.event, body.data).await?;

    audit(
        &state,
        &identity,
        AdminAction::SendToUser {
            user_id: target.to_string(),
            event: body.event,
            delivered: report.delivered,
        },
    )
    .await;
    Ok(Json(report))
}

/// `DELETE /v1/admin/rate-limits/:key`
///
/// Clears the key on the HTTP limiter and, when enabled, the inbound frame limiter.
#[instrument(skip_all, name = "rt.admin.reset_rate_limit")]
pub async fn reset_rate_limit(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(key): Path<String>,
) -> Result<StatusCode, RtError> {
    state.admission.reset(&key).await?;
    if let Some(ws_admission) = &state.ws_admission {
        ws_admission.reset(&key).await?;
    }

    info!(target: "rt.admin", actor_id = %identity.user_id, key = %key, "Rate limit reset");
    audit(&state, &identity, AdminAction::ResetRateLimit { key }).await;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v1/internal/topics/:topic/subscribers`
pub async fn topic_subscribers(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
) -> Json<SubscriberCount> {
    let subscribers = state.hub.subscriber_count(&topic).await;
    Json(SubscriberCount { topic, subscribers })
}

async fn audit(state: &AppState, actor: &Identity, action: AdminAction) {
    let name = action.name();
    if let Err(e) = state.integrity.record(AuditRecord::new(actor, action)).await {
        warn!(
            target: "rt.admin",
            actor_id = %actor.user_id,
            action = name,
            error = %e,
            "Failed to record audit entry"
        );
    }
}
