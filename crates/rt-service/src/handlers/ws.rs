//! WebSocket upgrade endpoint.
//!
//! `GET /ws?token=<credential>`
//!
//! The credential is validated before the upgrade is accepted, so an invalid
//! or missing token is answered with a plain 401 and no session ever exists.
//! When `resolve_identity` already validated it, that identity is reused.

use crate::auth::Identity;
use crate::errors::RtError;
use crate::observability::metrics;
use crate::routes::AppState;
use crate::session::{run_session, SessionContext};
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    Extension,
    response::Response,
};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub token: Option<String>,
}

#[instrument(skip_all, name = "rt.endpoint.ws")]
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    resolved: Option<Extension<Identity>>,
    upgrade: Option<WebSocketUpgrade>,
) -> Result<Response, RtError> {
    let identity = match resolved {
        Some(Extension(identity)) => identity,
        None => authenticate(&state, params).await.map_err(|e| {
            metrics::record_ws_upgrade("unauthorized");
            e
        })?,
    };

    let Some(upgrade) = upgrade else {
        return Err(RtError::BadRequest(
            "WebSocket upgrade required".to_string(),
        ));
    };

    debug!(
        target: "rt.endpoint",
        user_id = %identity.user_id,
        account_type = identity.account_type.as_str(),
        "Accepting WebSocket upgrade"
    );
    metrics::record_ws_upgrade("accepted");

    let ctx = SessionContext {
        hub: state.hub.clone(),
        ws_admission: state.ws_admission.clone(),
    };
    let settings = state.session_settings.clone();

    Ok(upgrade
        .max_message_size(settings.max_frame_bytes)
        .max_frame_size(settings.max_frame_bytes)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            run_session(sink, stream, identity, ctx, settings).await;
        }))
}

async fn authenticate(state: &AppState, params: WsParams) -> Result<Identity, RtError> {
    let Some(token) = params.token.filter(|t| !t.is_empty()) else {
        return Err(RtError::Unauthorized("Missing token".to_string()));
    };
    state.token_validator.validate(&token).await
}
