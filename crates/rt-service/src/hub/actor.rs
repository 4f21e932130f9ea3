//! Hub coordinator task.
//!
//! The coordinator is the single writer of the [`Registry`]. It drains the
//! hub mailbox one message at a time, taking the write lock only for
//! mutations. Fan-out runs under the read lock and never awaits: delivery is
//! a non-blocking `try_send` into each session's bounded outbound queue, so
//! a slow session can lose messages but can never stall the hub.

use super::mailbox::MailboxMonitor;
use super::messages::HubMessage;
use super::policy::can_subscribe;
use super::registry::{Registry, SessionEntry};
use super::{BroadcastReport, SessionRegistration};
use crate::errors::RtError;
use crate::observability::metrics;
use crate::protocol::Envelope;

use common::types::{SessionId, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub(super) struct HubActor {
    instance_id: String,
    receiver: mpsc::Receiver<HubMessage>,
    registry: Arc<RwLock<Registry>>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl HubActor {
    pub(super) fn new(
        instance_id: String,
        receiver: mpsc::Receiver<HubMessage>,
        registry: Arc<RwLock<Registry>>,
        cancel_token: CancellationToken,
        mailbox: Arc<MailboxMonitor>,
    ) -> Self {
        Self {
            instance_id,
            receiver,
            registry,
            cancel_token,
            mailbox,
        }
    }

    #[instrument(skip_all, name = "rt.hub", fields(instance_id = %self.instance_id))]
    pub(super) async fn run(mut self) {
        info!(target: "rt.hub", instance_id = %self.instance_id, "Hub coordinator started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rt.hub",
                        instance_id = %self.instance_id,
                        "Hub coordinator received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "rt.hub",
                                instance_id = %self.instance_id,
                                "Hub channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        let sessions_remaining = self.registry.read().await.session_count();
        info!(
            target: "rt.hub",
            instance_id = %self.instance_id,
            sessions_remaining,
            messages_processed = self.mailbox.messages_processed(),
            "Hub coordinator stopped"
        );
    }

    async fn handle_message(&mut self, message: HubMessage) {
        debug!(target: "rt.hub", kind = message.kind(), "Handling hub message");

        match message {
            HubMessage::Register {
                registration,
                respond_to,
            } => {
                let result = self.register(registration).await;
                let _ = respond_to.send(result);
            }

            HubMessage::Unregister {
                session_id,
                respond_to,
            } => {
                let removed = self.unregister(session_id).await;
                let _ = respond_to.send(removed);
            }

            HubMessage::Subscribe {
                session_id,
                topic,
                respond_to,
            } => {
                let result = self.subscribe(session_id, &topic).await;
                let _ = respond_to.send(result);
            }

            HubMessage::Unsubscribe {
                session_id,
                topic,
                respond_to,
            } => {
                let existed = self.registry.write().await.unsubscribe(&session_id, &topic);
                debug!(
                    target: "rt.hub",
                    session_id = %session_id,
                    topic = %topic,
                    existed,
                    "Unsubscribed"
                );
                let _ = respond_to.send(existed);
            }

            HubMessage::Broadcast {
                envelope,
                respond_to,
            } => {
                let report = self.broadcast(envelope).await;
                let _ = respond_to.send(report);
            }

            HubMessage::SendToUser {
                user_id,
                envelope,
                respond_to,
            } => {
                let result = self.send_to_user(&user_id, envelope).await;
                let _ = respond_to.send(result);
            }
        }
    }

    async fn register(&mut self, registration: SessionRegistration) -> Result<(), RtError> {
        let SessionRegistration {
            session_id,
            user_id,
            account_type,
            outbound,
        } = registration;

        let mut registry = self.registry.write().await;
        let inserted = registry.insert(
            session_id,
            SessionEntry {
                user_id: user_id.clone(),
                account_type,
                outbound,
                topics: HashSet::new(),
            },
        );
        if !inserted {
            return Err(RtError::Conflict(format!(
                "Session {session_id} is already registered"
            )));
        }

        metrics::set_sessions_active(registry.session_count());
        debug!(
            target: "rt.hub",
            session_id = %session_id,
            user_id = %user_id,
            account_type = account_type.as_str(),
            sessions = registry.session_count(),
            "Session registered"
        );
        Ok(())
    }

    async fn unregister(&mut self, session_id: SessionId) -> bool {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.remove(&session_id) else {
            return false;
        };

        metrics::set_sessions_active(registry.session_count());
        debug!(
            target: "rt.hub",
            session_id = %session_id,
            user_id = %entry.user_id,
            topics_released = entry.topics.len(),
            sessions = registry.session_count(),
            "Session unregistered"
        );
        true
    }

    async fn subscribe(&mut self, session_id: SessionId, topic: &str) -> Result<(), RtError> {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.get(&session_id) else {
            return Err(RtError::Internal(format!(
                "Session {session_id} is not registered"
            )));
        };

        if !can_subscribe(entry.account_type, &entry.user_id, topic) {
            warn!(
                target: "rt.hub",
                session_id = %session_id,
                user_id = %entry.user_id,
                account_type = entry.account_type.as_str(),
                topic = %topic,
                "Subscription denied"
            );
            metrics::record_subscription(false);
            return Err(RtError::PermissionDenied(format!(
                "Not permitted to subscribe to {topic}"
            )));
        }

        registry.subscribe(session_id, topic);
        metrics::record_subscription(true);
        debug!(
            target: "rt.hub",
            session_id = %session_id,
            topic = %topic,
            subscribers = registry.subscriber_count(topic),
            "Subscribed"
        );
        Ok(())
    }

    async fn broadcast(&self, envelope: Envelope) -> BroadcastReport {
        let Some(topic) = envelope.topic.clone() else {
            return BroadcastReport::default();
        };

        let registry = self.registry.read().await;
        let envelope = Arc::new(envelope);
        let report = deliver(registry.subscribers(&topic), &envelope);

        metrics::record_broadcast("topic", &report);
        debug!(
            target: "rt.hub",
            topic = %topic,
            message_id = %envelope.id,
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast complete"
        );
        report
    }

    async fn send_to_user(
        &self,
        user_id: &UserId,
        envelope: Envelope,
    ) -> Result<BroadcastReport, RtError> {
        let registry = self.registry.read().await;
        if !registry.is_user_connected(user_id) {
            return Err(RtError::UserNotConnected(user_id.to_string()));
        }

        let envelope = Arc::new(envelope);
        let report = deliver(registry.sessions_of(user_id), &envelope);

        metrics::record_broadcast("user", &report);
        debug!(
            target: "rt.hub",
            user_id = %user_id,
            message_id = %envelope.id,
            delivered = report.delivered,
            dropped = report.dropped,
            "Direct send complete"
        );
        Ok(report)
    }
}

/// Non-blocking delivery to every target's outbound queue.
fn deliver<'a>(
    targets: impl Iterator<Item = (&'a SessionId, &'a SessionEntry)>,
    envelope: &Arc<Envelope>,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for (session_id, entry) in targets {
        match super::try_enqueue(&entry.outbound, Arc::clone(envelope)) {
            Ok(true) => report.delivered += 1,
            Ok(false) => {
                // Session is tearing down; its unregister is already queued
                report.dropped += 1;
                metrics::record_message_dropped("session_closed");
            }
            Err(e) => {
                report.dropped += 1;
                metrics::record_message_dropped("buffer_full");
                warn!(
                    target: "rt.hub",
                    session_id = %session_id,
                    user_id = %entry.user_id,
                    message_id = %envelope.id,
                    error = %e,
                    "Dropping message"
                );
            }
        }
    }

    report
}
