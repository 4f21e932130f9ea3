//! Session reader task.

use super::{CloseReason, SessionShared};
use crate::errors::RtError;
use crate::hub::{can_subscribe, try_enqueue, HubHandle};
use crate::observability::metrics;
use crate::protocol::{
    Envelope, MessageType, CODE_INVALID_MESSAGE, CODE_UNSUPPORTED_MESSAGE_TYPE, EVENT_SUBSCRIBED,
    EVENT_UNSUBSCRIBED,
};
use admission::AdmissionController;
use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

pub(super) struct ReaderContext {
    pub hub: HubHandle,
    pub ws_admission: Option<AdmissionController>,
    /// The session's own outbound queue, for replies.
    pub outbound: mpsc::Sender<Arc<Envelope>>,
}

#[instrument(
    skip_all,
    name = "rt.session.reader",
    fields(session_id = %shared.session_id, user_id = %shared.identity.user_id)
)]
pub(super) async fn read_loop<St, E>(
    mut stream: St,
    shared: Arc<SessionShared>,
    ctx: ReaderContext,
    liveness_timeout: Duration,
) -> CloseReason
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let reason = loop {
        let next = tokio::select! {
            () = shared.cancel_token().cancelled() => None,
            next = tokio::time::timeout(liveness_timeout, stream.next()) => Some(next),
        };

        let message = match next {
            None => break CloseReason::Shutdown,
            Some(Err(_)) => {
                debug!(
                    target: "rt.session",
                    session_id = %shared.session_id,
                    timeout_secs = liveness_timeout.as_secs(),
                    "No inbound frame within liveness timeout"
                );
                break CloseReason::LivenessTimeout;
            }
            Some(Ok(None)) => break CloseReason::ClientClosed,
            Some(Ok(Some(Err(e)))) => {
                debug!(target: "rt.session", session_id = %shared.session_id, error = %e, "Read failed");
                break CloseReason::TransportError;
            }
            Some(Ok(Some(Ok(message)))) => message,
        };

        match message {
            Message::Text(text) => handle_text(&text, &shared, &ctx).await,
            Message::Binary(_) => {
                metrics::record_inbound_message("invalid");
                reply(
                    &shared,
                    &ctx,
                    Envelope::error(CODE_INVALID_MESSAGE, "Binary frames are not supported", None),
                );
            }
            // Transport-level pings are answered by the protocol layer; either
            // kind of control frame already proved liveness by arriving
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break CloseReason::ClientClosed,
        }
    };

    shared.close(reason);
    reason
}

async fn handle_text(text: &str, shared: &SessionShared, ctx: &ReaderContext) {
    if let Some(limiter) = &ctx.ws_admission {
        let key = format!("ws:{}", shared.identity.user_id);
        let decision = limiter.check_limit(&key).await;
        if !decision.allowed {
            metrics::record_admission_rejected("ws_message");
            let err = RtError::RateLimitExceeded {
                retry_after_secs: decision.retry_after_secs(),
            };
            reply(
                shared,
                ctx,
                Envelope::error(err.error_code(), err.client_message(), None),
            );
            return;
        }
    }

    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            metrics::record_inbound_message("invalid");
            debug!(
                target: "rt.session",
                session_id = %shared.session_id,
                error = %e,
                "Malformed inbound frame"
            );
            reply(
                shared,
                ctx,
                Envelope::error(CODE_INVALID_MESSAGE, "Message is not a valid envelope", None),
            );
            return;
        }
    };
    metrics::record_inbound_message(envelope.kind.as_str());

    match envelope.kind {
        MessageType::Subscribe => {
            let Some(topic) = required_topic(&envelope, shared, ctx) else {
                return;
            };
            let response = match ctx.hub.subscribe(shared.session_id, &topic).await {
                Ok(()) => Envelope::system(EVENT_SUBSCRIBED, Some(serde_json::json!({ "topic": topic }))),
                Err(e) => Envelope::error(e.error_code(), e.client_message(), Some(topic.clone())),
            };
            reply(shared, ctx, Envelope { topic: Some(topic), ..response });
        }

        MessageType::Unsubscribe => {
            let Some(topic) = required_topic(&envelope, shared, ctx) else {
                return;
            };
            let response = match ctx.hub.unsubscribe(shared.session_id, &topic).await {
                Ok(_) => {
                    Envelope::system(EVENT_UNSUBSCRIBED, Some(serde_json::json!({ "topic": topic })))
                }
                Err(e) => Envelope::error(e.error_code(), e.client_message(), None),
            };
            reply(shared, ctx, Envelope { topic: Some(topic), ..response });
        }

        MessageType::Ping => reply(shared, ctx, Envelope::pong(&envelope.id)),

        MessageType::Pong => {}

        kind if kind.is_publishable() => publish(envelope, shared, ctx).await,

        other => {
            debug!(
                target: "rt.session",
                session_id = %shared.session_id,
                message_type = other.as_str(),
                "Unsupported inbound message type"
            );
            reply(
                shared,
                ctx,
                Envelope::error(
                    CODE_UNSUPPORTED_MESSAGE_TYPE,
                    format!("Message type '{}' is not accepted from clients", other.as_str()),
                    None,
                ),
            );
        }
    }
}

/// Relay a client event to its topic if the sender may use that topic.
async fn publish(envelope: Envelope, shared: &SessionShared, ctx: &ReaderContext) {
    let Some(topic) = required_topic(&envelope, shared, ctx) else {
        return;
    };

    let identity = &shared.identity;
    if !can_subscribe(identity.account_type, &identity.user_id, &topic) {
        let err = RtError::PermissionDenied(format!("Not permitted to publish to {topic}"));
        reply(
            shared,
            ctx,
            Envelope::error(err.error_code(), err.client_message(), Some(topic)),
        );
        return;
    }

    let relayed = Envelope {
        timestamp: chrono::Utc::now(),
        ..envelope
    }
    .with_metadata("sender_id", identity.user_id.as_str());

    if let Err(e) = ctx.hub.publish(relayed).await {
        reply(
            shared,
            ctx,
            Envelope::error(e.error_code(), e.client_message(), Some(topic)),
        );
    }
}

fn required_topic(envelope: &Envelope, shared: &SessionShared, ctx: &ReaderContext) -> Option<String> {
    match envelope.topic.as_deref() {
        Some(topic) if !topic.is_empty() => Some(topic.to_string()),
        _ => {
            reply(
                shared,
                ctx,
                Envelope::error(
                    CODE_INVALID_MESSAGE,
                    format!("'{}' requires a topic", envelope.kind.as_str()),
                    None,
                ),
            );
            None
        }
    }
}

/// Queue a reply without waiting; a full queue drops it like any other message.
fn reply(shared: &SessionShared, ctx: &ReaderContext, envelope: Envelope) {
    if let Err(e) = try_enqueue(&ctx.outbound, Arc::new(envelope)) {
        metrics::record_message_dropped("buffer_full");
        debug!(
            target: "rt.session",
            session_id = %shared.session_id,
            error = %e,
            "Dropping reply"
        );
    }
}
