//! Messages accepted by the hub coordinator.

use super::{BroadcastReport, SessionRegistration};
use crate::errors::RtError;
use crate::protocol::Envelope;
use common::types::{SessionId, UserId};
use tokio::sync::oneshot;

/// Requests serialized through the coordinator.
///
/// Every registry mutation and every fan-out goes through here, so they are
/// totally ordered.
#[derive(Debug)]
pub enum HubMessage {
    /// Add a session to the registry.
    Register {
        registration: SessionRegistration,
        respond_to: oneshot::Sender<Result<(), RtError>>,
    },

    /// Remove a session and all its subscriptions. Replies whether it was present.
    Unregister {
        session_id: SessionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Authorize and record a subscription.
    Subscribe {
        session_id: SessionId,
        topic: String,
        respond_to: oneshot::Sender<Result<(), RtError>>,
    },

    /// Drop a subscription. Replies whether it existed.
    Unsubscribe {
        session_id: SessionId,
        topic: String,
        respond_to: oneshot::Sender<bool>,
    },

    /// Fan an envelope out to the subscribers of its topic.
    Broadcast {
        envelope: Envelope,
        respond_to: oneshot::Sender<BroadcastReport>,
    },

    /// Deliver an envelope to every live session of a user.
    SendToUser {
        user_id: UserId,
        envelope: Envelope,
        respond_to: oneshot::Sender<Result<BroadcastReport, RtError>>,
    },
}

impl HubMessage {
    /// Label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            HubMessage::Register { .. } => "register",
            HubMessage::Unregister { .. } => "unregister",
            HubMessage::Subscribe { .. } => "subscribe",
            HubMessage::Unsubscribe { .. } => "unsubscribe",
            HubMessage::Broadcast { .. } => "broadcast",
            HubMessage::SendToUser { .. } => "send_to_user",
        }
    }
}
