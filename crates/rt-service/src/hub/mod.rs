//! Pub/sub hub.
//!
//! The hub tracks live sessions, their topic subscriptions, and fans events
//! out to subscribers. All mutations and fan-outs are serialized through a
//! single coordinator task (see [`actor`]); read-only queries such as
//! [`HubHandle::subscriber_count`] go straight to the registry under a read
//! lock and do not queue behind the coordinator.
//!
//! # Delivery
//!
//! Each session owns a bounded outbound queue. The hub pushes into it with
//! `try_send`; when the queue is full the message is dropped for that
//! session only and counted in the returned [`BroadcastReport`].

mod actor;
pub mod mailbox;
mod messages;
pub mod policy;
mod registry;

pub use mailbox::{MailboxLevel, MailboxMonitor};
pub use messages::HubMessage;
pub use policy::can_subscribe;

use crate::errors::RtError;
use crate::protocol::Envelope;
use actor::HubActor;
use common::types::{AccountType, SessionId, UserId};
use registry::Registry;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

/// Default capacity of the coordinator mailbox.
pub const DEFAULT_HUB_MAILBOX_CAPACITY: usize = 1000;

/// Hub construction parameters.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Instance id, for logs.
    pub instance_id: String,
    pub mailbox_capacity: usize,
}

impl HubConfig {
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            mailbox_capacity: DEFAULT_HUB_MAILBOX_CAPACITY,
        }
    }
}

/// Everything the hub needs to know about a new session.
#[derive(Debug)]
pub struct SessionRegistration {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub account_type: AccountType,
    /// Sending half of the session's bounded outbound queue.
    pub outbound: mpsc::Sender<Arc<Envelope>>,
}

/// Outcome of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Sessions whose queue accepted the message.
    pub delivered: usize,
    /// Sessions that missed it (queue full or closing).
    pub dropped: usize,
}

/// Queue `envelope` on a session's outbound buffer without waiting.
///
/// `Ok(false)` means the queue is closed because the session is tearing
/// down. A full queue is [`RtError::BufferFull`].
pub fn try_enqueue(
    outbound: &mpsc::Sender<Arc<Envelope>>,
    envelope: Arc<Envelope>,
) -> Result<bool, RtError> {
    match outbound.try_send(envelope) {
        Ok(()) => Ok(true),
        Err(TrySendError::Full(_)) => Err(RtError::BufferFull),
        Err(TrySendError::Closed(_)) => Ok(false),
    }
}

/// Handle to the hub coordinator.
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubMessage>,
    registry: Arc<RwLock<Registry>>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl HubHandle {
    /// Spawn the coordinator and return a handle to it.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self::with_cancel_token(config, CancellationToken::new())
    }

    /// Spawn the coordinator under an existing cancellation token.
    #[must_use]
    pub fn with_cancel_token(config: HubConfig, cancel_token: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::channel(config.mailbox_capacity.max(1));
        let registry = Arc::new(RwLock::new(Registry::default()));
        let mailbox = Arc::new(MailboxMonitor::new());

        let actor = HubActor::new(
            config.instance_id,
            receiver,
            Arc::clone(&registry),
            cancel_token.clone(),
            Arc::clone(&mailbox),
        );
        tokio::spawn(actor.run());

        Self {
            sender,
            registry,
            cancel_token,
            mailbox,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HubMessage,
    ) -> Result<T, RtError> {
        let (tx, rx) = oneshot::channel();

        self.mailbox.record_enqueue();
        if let Err(e) = self.sender.send(build(tx)).await {
            self.mailbox.record_send_failed();
            return Err(RtError::Internal(format!("hub channel send failed: {e}")));
        }

        rx.await
            .map_err(|e| RtError::Internal(format!("hub response receive failed: {e}")))
    }

    /// Add a session to the registry.
    ///
    /// # Errors
    ///
    /// `Conflict` if the session id is already registered.
    pub async fn register(&self, registration: SessionRegistration) -> Result<(), RtError> {
        self.request(|respond_to| HubMessage::Register {
            registration,
            respond_to,
        })
        .await?
    }

    /// Remove a session and all of its subscriptions.
    ///
    /// Idempotent: returns `Ok(false)` for an unknown session.
    pub async fn unregister(&self, session_id: SessionId) -> Result<bool, RtError> {
        self.request(|respond_to| HubMessage::Unregister {
            session_id,
            respond_to,
        })
        .await
    }

    /// Subscribe a session to `topic`.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` if the session's account may not use the topic.
    pub async fn subscribe(&self, session_id: SessionId, topic: &str) -> Result<(), RtError> {
        let topic = topic.to_string();
        self.request(|respond_to| HubMessage::Subscribe {
            session_id,
            topic,
            respond_to,
        })
        .await?
    }

    /// Unsubscribe a session from `topic`. Returns whether it was subscribed.
    pub async fn unsubscribe(&self, session_id: SessionId, topic: &str) -> Result<bool, RtError> {
        let topic = topic.to_string();
        self.request(|respond_to| HubMessage::Unsubscribe {
            session_id,
            topic,
            respond_to,
        })
        .await
    }

    /// Fan `envelope` out to the subscribers of its topic.
    ///
    /// # Errors
    ///
    /// `BadRequest` if the envelope has no topic.
    pub async fn publish(&self, envelope: Envelope) -> Result<BroadcastReport, RtError> {
        if envelope.topic.as_deref().map_or(true, str::is_empty) {
            return Err(RtError::BadRequest("Envelope has no topic".to_string()));
        }
        self.request(|respond_to| HubMessage::Broadcast {
            envelope,
            respond_to,
        })
        .await
    }

    /// Publish a server event under `topic`.
    pub async fn broadcast(
        &self,
        topic: &str,
        event: &str,
        data: Option<serde_json::Value>,
    ) -> Result<BroadcastReport, RtError> {
        self.publish(Envelope::event(topic, event, data)).await
    }

    /// Deliver an event to every live session of `user_id`.
    ///
    /// # Errors
    ///
    /// `UserNotConnected` if the user has no live session.
    pub async fn send_to_user(
        &self,
        user_id: &UserId,
        event: &str,
        data: Option<serde_json::Value>,
    ) -> Result<BroadcastReport, RtError> {
        let envelope = Envelope {
            event: Some(event.to_string()),
            data,
            ..Envelope::new(crate::protocol::MessageType::Event)
        };
        let user_id = user_id.clone();
        self.request(|respond_to| HubMessage::SendToUser {
            user_id,
            envelope,
            respond_to,
        })
        .await?
    }

    /// Current subscriber count for `topic`.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.read().await.subscriber_count(topic)
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.registry.read().await.session_count()
    }

    /// Number of topics with at least one subscriber.
    pub async fn topic_count(&self) -> usize {
        self.registry.read().await.topic_count()
    }

    /// Whether `user_id` has at least one live session.
    pub async fn is_user_connected(&self, user_id: &UserId) -> bool {
        self.registry.read().await.is_user_connected(user_id)
    }

    /// Topics `session_id` is subscribed to, sorted.
    pub async fn topics_of(&self, session_id: &SessionId) -> Vec<String> {
        let registry = self.registry.read().await;
        let mut topics: Vec<String> = registry
            .get(session_id)
            .map(|entry| entry.topics.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// Mailbox statistics of the coordinator.
    #[must_use]
    pub fn mailbox(&self) -> &MailboxMonitor {
        &self.mailbox
    }

    /// Stop the coordinator. Sessions holding child tokens are cancelled too.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Token for a session; cancelled when the hub is.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;
    use serde_json::json;

    #[test]
    fn test_try_enqueue_reports_full_and_closed_queues() {
        let (tx, mut rx) = mpsc::channel(1);
        let envelope = Arc::new(Envelope::new(MessageType::Ping));

        assert!(try_enqueue(&tx, Arc::clone(&envelope)).unwrap());
        assert!(matches!(
            try_enqueue(&tx, Arc::clone(&envelope)),
            Err(RtError::BufferFull)
        ));

        rx.close();
        assert!(!try_enqueue(&tx, envelope).unwrap());
    }

    fn hub() -> HubHandle {
        HubHandle::new(HubConfig {
            instance_id: "rt-test".to_string(),
            mailbox_capacity: 64,
        })
    }

    async fn connect(
        hub: &HubHandle,
        user: &str,
        account_type: AccountType,
        capacity: usize,
    ) -> (SessionId, mpsc::Receiver<Arc<Envelope>>) {
        let session_id = SessionId::new();
        let (outbound, rx) = mpsc::channel(capacity);
        hub.register(SessionRegistration {
            session_id,
            user_id: UserId::from(user),
            account_type,
            outbound,
        })
        .await
        .unwrap();
        (session_id, rx)
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let hub = hub();
        let (session_id, _rx) = connect(&hub, "u1", AccountType::Buyer, 4).await;
        assert_eq!(hub.session_count().await, 1);
        assert!(hub.is_user_connected(&UserId::from("u1")).await);

        assert!(hub.unregister(session_id).await.unwrap());
        assert!(!hub.unregister(session_id).await.unwrap());
        assert_eq!(hub.session_count().await, 0);
        hub.cancel();
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let hub = hub();
        let (session_id, _rx) = connect(&hub, "u1", AccountType::Buyer, 4).await;
        let (outbound, _rx2) = mpsc::channel(4);
        let result = hub
            .register(SessionRegistration {
                session_id,
                user_id: UserId::from("u1"),
                account_type: AccountType::Buyer,
                outbound,
            })
            .await;
        assert!(matches!(result, Err(RtError::Conflict(_))));
        hub.cancel();
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_subscribers() {
        let hub = hub();
        let (seller, mut seller_rx) = connect(&hub, "seller-a", AccountType::Seller, 4).await;
        let (buyer, mut buyer_rx) = connect(&hub, "buyer-b", AccountType::Buyer, 4).await;

        hub.subscribe(seller, "bids.auction-1").await.unwrap();
        let denied = hub.subscribe(buyer, "bids.auction-1").await;
        assert!(matches!(denied, Err(RtError::PermissionDenied(_))));
        assert_eq!(hub.subscriber_count("bids.auction-1").await, 1);

        let report = hub
            .broadcast("bids.auction-1", "bid.placed", Some(json!({"amount": 5})))
            .await
            .unwrap();
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 0 });

        let received = seller_rx.recv().await.unwrap();
        assert_eq!(received.event.as_deref(), Some("bid.placed"));
        assert_eq!(received.topic.as_deref(), Some("bids.auction-1"));
        assert!(buyer_rx.try_recv().is_err());
        hub.cancel();
    }

    #[tokio::test]
    async fn test_full_buffer_drops_without_blocking() {
        let hub = hub();
        let (slow, mut slow_rx) = connect(&hub, "slow", AccountType::Buyer, 1).await;
        let (fast, mut fast_rx) = connect(&hub, "fast", AccountType::Buyer, 8).await;
        hub.subscribe(slow, "calls.live").await.unwrap();
        hub.subscribe(fast, "calls.live").await.unwrap();

        let first = hub.broadcast("calls.live", "call.started", None).await.unwrap();
        assert_eq!(first, BroadcastReport { delivered: 2, dropped: 0 });

        let second = hub.broadcast("calls.live", "call.ended", None).await.unwrap();
        assert_eq!(second, BroadcastReport { delivered: 1, dropped: 1 });

        assert_eq!(slow_rx.recv().await.unwrap().event.as_deref(), Some("call.started"));
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(fast_rx.recv().await.unwrap().event.as_deref(), Some("call.started"));
        assert_eq!(fast_rx.recv().await.unwrap().event.as_deref(), Some("call.ended"));
        hub.cancel();
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_topic() {
        let hub = hub();
        let report = hub.broadcast("calls.nobody", "x", None).await.unwrap();
        assert_eq!(report, BroadcastReport::default());
        hub.cancel();
    }

    #[tokio::test]
    async fn test_publish_requires_topic() {
        let hub = hub();
        let result = hub.publish(Envelope::new(MessageType::Event)).await;
        assert!(matches!(result, Err(RtError::BadRequest(_))));
        hub.cancel();
    }

    #[tokio::test]
    async fn test_unregister_releases_subscriptions() {
        let hub = hub();
        let (session_id, _rx) = connect(&hub, "u1", AccountType::Buyer, 4).await;
        hub.subscribe(session_id, "calls.a").await.unwrap();
        hub.subscribe(session_id, "user.u1").await.unwrap();
        assert_eq!(
            hub.topics_of(&session_id).await,
            vec!["calls.a".to_string(), "user.u1".to_string()]
        );

        hub.unregister(session_id).await.unwrap();
        assert_eq!(hub.topic_count().await, 0);
        assert!(hub.topics_of(&session_id).await.is_empty());
        hub.cancel();
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let hub = hub();
        let (session_id, _rx) = connect(&hub, "u1", AccountType::Buyer, 4).await;
        hub.subscribe(session_id, "calls.a").await.unwrap();
        assert!(hub.unsubscribe(session_id, "calls.a").await.unwrap());
        assert!(!hub.unsubscribe(session_id, "calls.a").await.unwrap());
        assert_eq!(hub.subscriber_count("calls.a").await, 0);
        hub.cancel();
    }

    #[tokio::test]
    async fn test_send_to_user_reaches_all_sessions() {
        let hub = hub();
        let (_a, mut rx_a) = connect(&hub, "u1", AccountType::Buyer, 4).await;
        let (_b, mut rx_b) = connect(&hub, "u1", AccountType::Buyer, 4).await;
        let (_c, mut rx_c) = connect(&hub, "u2", AccountType::Buyer, 4).await;

        let report = hub
            .send_to_user(&UserId::from("u1"), "payout.settled", None)
            .await
            .unwrap();
        assert_eq!(report.delivered, 2);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
        assert!(rx_c.try_recv().is_err());
        hub.cancel();
    }

    #[tokio::test]
    async fn test_send_to_disconnected_user() {
        let hub = hub();
        let result = hub.send_to_user(&UserId::from("ghost"), "x", None).await;
        assert!(matches!(result, Err(RtError::UserNotConnected(_))));
        hub.cancel();
    }

    #[tokio::test]
    async fn test_closed_session_counts_as_dropped() {
        let hub = hub();
        let (session_id, rx) = connect(&hub, "u1", AccountType::Buyer, 4).await;
        hub.subscribe(session_id, "calls.a").await.unwrap();
        drop(rx);

        let report = hub.broadcast("calls.a", "x", None).await.unwrap();
        assert_eq!(report, BroadcastReport { delivered: 0, dropped: 1 });
        hub.cancel();
    }

    #[tokio::test]
    async fn test_cancelled_hub_rejects_requests() {
        let hub = hub();
        let child = hub.child_token();
        hub.cancel();
        assert!(hub.is_cancelled());
        assert!(child.is_cancelled());

        // Give the coordinator a chance to observe cancellation and drop its receiver
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let result = hub.unregister(SessionId::new()).await;
        assert!(matches!(result, Err(RtError::Internal(_))));
    }
}
