//! Wire protocol for realtime sessions.
//!
//! Every frame in either direction is a JSON text frame carrying one
//! [`Envelope`]:
//!
//! ```json
//! {"id": "...", "type": "event", "event": "bid.placed", "topic": "bids.auction-1",
//!  "data": {...}, "timestamp": "2024-01-01T00:00:00Z", "metadata": {...}}
//! ```
//!
//! Clients may omit `id` and `timestamp`; the server fills them in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Event name for the greeting sent once a session is live.
pub const EVENT_CONNECTED: &str = "connected";
/// Event name confirming a subscription.
pub const EVENT_SUBSCRIBED: &str = "subscribed";
/// Event name confirming an unsubscription.
pub const EVENT_UNSUBSCRIBED: &str = "unsubscribed";

/// Error code for frames that are not a valid envelope.
pub const CODE_INVALID_MESSAGE: &str = "INVALID_MESSAGE";
/// Error code for envelope types a client may not send.
pub const CODE_UNSUPPORTED_MESSAGE_TYPE: &str = "UNSUPPORTED_MESSAGE_TYPE";

/// Envelope `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Subscribe,
    Unsubscribe,
    Ping,
    Pong,
    Event,
    System,
    Error,
    Bid,
    Call,
    /// Anything else a client sends.
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// Label for metrics and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageType::Subscribe => "subscribe",
            MessageType::Unsubscribe => "unsubscribe",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Event => "event",
            MessageType::System => "system",
            MessageType::Error => "error",
            MessageType::Bid => "bid",
            MessageType::Call => "call",
            MessageType::Unknown => "unknown",
        }
    }

    /// Types a client may publish to a topic.
    #[must_use]
    pub const fn is_publishable(&self) -> bool {
        matches!(self, MessageType::Event | MessageType::Bid | MessageType::Call)
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "new_message_id")]
    pub id: String,

    #[serde(rename = "type")]
    pub kind: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

impl Envelope {
    /// Bare envelope of `kind` with a fresh id and timestamp.
    #[must_use]
    pub fn new(kind: MessageType) -> Self {
        Self {
            id: new_message_id(),
            kind,
            event: None,
            topic: None,
            data: None,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Server-originated notice (greeting, subscription confirmations).
    #[must_use]
    pub fn system(event: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            event: Some(event.into()),
            data,
            ..Self::new(MessageType::System)
        }
    }

    /// Event published under `topic`.
    #[must_use]
    pub fn event(topic: impl Into<String>, event: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            event: Some(event.into()),
            topic: Some(topic.into()),
            data,
            ..Self::new(MessageType::Event)
        }
    }

    /// In-band error. `data` carries `{"code", "message"}`.
    #[must_use]
    pub fn error(code: &str, message: impl Into<String>, topic: Option<String>) -> Self {
        Self {
            event: Some("error".to_string()),
            topic,
            data: Some(serde_json::json!({ "code": code, "message": message.into() })),
            ..Self::new(MessageType::Error)
        }
    }

    /// Reply to an application-level ping; echoes the ping's id.
    #[must_use]
    pub fn pong(reply_to: &str) -> Self {
        Self {
            id: reply_to.to_string(),
            ..Self::new(MessageType::Pong)
        }
    }

    /// Attach a metadata field.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }

    /// The `code` of an error envelope.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        if self.kind != MessageType::Error {
            return None;
        }
        self.data.as_ref()?.get("code")?.as_str()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization_shape() {
        let envelope = Envelope::event("bids.auction-1", "bid.placed", Some(json!({"amount": 12})));
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["type"], "event");
        assert_eq!(value["topic"], "bids.auction-1");
        assert_eq!(value["event"], "bid.placed");
        assert_eq!(value["data"]["amount"], 12);
        assert!(value["id"].is_string());
        assert!(value["timestamp"].is_string());
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_client_message_without_id_or_timestamp() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"type":"subscribe","topic":"calls.live"}"#).unwrap();
        assert_eq!(envelope.kind, MessageType::Subscribe);
        assert_eq!(envelope.topic.as_deref(), Some("calls.live"));
        assert!(!envelope.id.is_empty());
    }

    #[test]
    fn test_unknown_type_parses_as_unknown() {
        let envelope: Envelope = serde_json::from_str(r#"{"type":"teleport"}"#).unwrap();
        assert_eq!(envelope.kind, MessageType::Unknown);
    }

    #[test]
    fn test_missing_type_is_rejected() {
        assert!(serde_json::from_str::<Envelope>(r#"{"topic":"calls.live"}"#).is_err());
        assert!(serde_json::from_str::<Envelope>("not json").is_err());
    }

    #[test]
    fn test_error_envelope() {
        let envelope = Envelope::error("PERMISSION_DENIED", "nope", Some("bids.a".to_string()));
        assert_eq!(envelope.kind, MessageType::Error);
        assert_eq!(envelope.error_code(), Some("PERMISSION_DENIED"));
        assert_eq!(envelope.topic.as_deref(), Some("bids.a"));
    }

    #[test]
    fn test_pong_echoes_id() {
        assert_eq!(Envelope::pong("abc").id, "abc");
        assert_eq!(Envelope::pong("abc").kind, MessageType::Pong);
    }

    #[test]
    fn test_with_metadata() {
        let envelope = Envelope::new(MessageType::Bid).with_metadata("sender_id", "seller-1");
        assert_eq!(
            envelope.metadata.unwrap().get("sender_id").unwrap(),
            &json!("seller-1")
        );
    }

    #[test]
    fn test_publishable_types() {
        assert!(MessageType::Event.is_publishable());
        assert!(MessageType::Bid.is_publishable());
        assert!(MessageType::Call.is_publishable());
        assert!(!MessageType::System.is_publishable());
        assert!(!MessageType::Subscribe.is_publishable());
    }
}
