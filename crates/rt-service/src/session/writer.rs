//! Session writer task.

use super::{CloseReason, SessionSettings, SessionShared};
use crate::protocol::Envelope;
use axum::extract::ws::{close_code, CloseFrame, Message};
use futures::{Sink, SinkExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, instrument, warn};

#[instrument(
    skip_all,
    name = "rt.session.writer",
    fields(session_id = %shared.session_id)
)]
pub(super) async fn write_loop<Si>(
    mut sink: Si,
    mut outbound: mpsc::Receiver<Arc<Envelope>>,
    shared: Arc<SessionShared>,
    settings: SessionSettings,
) -> CloseReason
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let mut keepalive = interval_at(
        Instant::now() + settings.keepalive_interval,
        settings.keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            () = shared.cancel_token().cancelled() => {
                let close = Message::Close(Some(CloseFrame {
                    code: close_code::NORMAL,
                    reason: "session closed".into(),
                }));
                // Best effort; the peer may already be gone
                let _ = send_frame(&mut sink, close, settings.write_timeout).await;
                break CloseReason::Shutdown;
            }

            item = outbound.recv() => {
                let Some(envelope) = item else {
                    break CloseReason::Shutdown;
                };
                let text = match serde_json::to_string(envelope.as_ref()) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(
                            target: "rt.session",
                            session_id = %shared.session_id,
                            message_id = %envelope.id,
                            error = %e,
                            "Failed to serialize outbound envelope"
                        );
                        continue;
                    }
                };
                if let Err(e) = send_frame(&mut sink, Message::Text(text), settings.write_timeout).await {
                    debug!(target: "rt.session", session_id = %shared.session_id, error = %e, "Write failed");
                    break CloseReason::WriteFailed;
                }
            }

            _ = keepalive.tick() => {
                if let Err(e) = send_frame(&mut sink, Message::Ping(Vec::new()), settings.write_timeout).await {
                    debug!(target: "rt.session", session_id = %shared.session_id, error = %e, "Keepalive failed");
                    break CloseReason::WriteFailed;
                }
            }
        }
    };

    shared.close(reason);
    reason
}

async fn send_frame<Si>(sink: &mut Si, frame: Message, timeout: Duration) -> Result<(), String>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    match tokio::time::timeout(timeout, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("write timed out after {}ms", timeout.as_millis())),
    }
}
