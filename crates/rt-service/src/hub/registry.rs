//! Session and subscription registry owned by the hub.
//!
//! Three indexes are kept consistent with each other:
//! sessions by id, subscribers by topic, and sessions by user. A topic with
//! no subscribers is removed, as is a user with no sessions.

use crate::protocol::Envelope;
use common::types::{AccountType, SessionId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A registered session.
#[derive(Debug)]
pub struct SessionEntry {
    pub user_id: UserId,
    pub account_type: AccountType,
    pub outbound: mpsc::Sender<Arc<Envelope>>,
    pub topics: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<SessionId, SessionEntry>,
    topics: HashMap<String, HashSet<SessionId>>,
    users: HashMap<UserId, HashSet<SessionId>>,
}

impl Registry {
    /// Insert a session. Returns `false` if the id is already registered.
    pub fn insert(&mut self, session_id: SessionId, entry: SessionEntry) -> bool {
        if self.sessions.contains_key(&session_id) {
            return false;
        }
        self.users
            .entry(entry.user_id.clone())
            .or_default()
            .insert(session_id);
        self.sessions.insert(session_id, entry);
        true
    }

    /// Remove a session and every subscription it holds.
    pub fn remove(&mut self, session_id: &SessionId) -> Option<SessionEntry> {
        let entry = self.sessions.remove(session_id)?;

        for topic in &entry.topics {
            self.detach(topic, session_id);
        }

        if let Some(ids) = self.users.get_mut(&entry.user_id) {
            ids.remove(session_id);
            if ids.is_empty() {
                self.users.remove(&entry.user_id);
            }
        }

        Some(entry)
    }

    #[must_use]
    pub fn get(&self, session_id: &SessionId) -> Option<&SessionEntry> {
        self.sessions.get(session_id)
    }

    /// Record a subscription. Returns `false` if the session is unknown.
    /// Subscribing twice is a no-op that still returns `true`.
    pub fn subscribe(&mut self, session_id: SessionId, topic: &str) -> bool {
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        entry.topics.insert(topic.to_string());
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(session_id);
        true
    }

    /// Drop a subscription. Returns whether it existed.
    pub fn unsubscribe(&mut self, session_id: &SessionId, topic: &str) -> bool {
        let Some(entry) = self.sessions.get_mut(session_id) else {
            return false;
        };
        if !entry.topics.remove(topic) {
            return false;
        }
        self.detach(topic, session_id);
        true
    }

    fn detach(&mut self, topic: &str, session_id: &SessionId) {
        if let Some(subscribers) = self.topics.get_mut(topic) {
            subscribers.remove(session_id);
            if subscribers.is_empty() {
                self.topics.remove(topic);
            }
        }
    }

    /// Sessions subscribed to `topic`.
    pub fn subscribers(&self, topic: &str) -> impl Iterator<Item = (&SessionId, &SessionEntry)> {
        self.topics
            .get(topic)
            .into_iter()
            .flatten()
            .filter_map(|id| self.sessions.get(id).map(|entry| (id, entry)))
    }

    /// Live sessions of `user_id`.
    pub fn sessions_of(&self, user_id: &UserId) -> impl Iterator<Item = (&SessionId, &SessionEntry)> {
        self.users
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.sessions.get(id).map(|entry| (id, entry)))
    }

    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, HashSet::len)
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    #[must_use]
    pub fn is_user_connected(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn entry(user: &str, account_type: AccountType) -> SessionEntry {
        let (outbound, _rx) = mpsc::channel(4);
        SessionEntry {
            user_id: UserId::from(user),
            account_type,
            outbound,
            topics: HashSet::new(),
        }
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let mut registry = Registry::default();
        let id = SessionId::new();
        assert!(registry.insert(id, entry("u1", AccountType::Buyer)));
        assert!(!registry.insert(id, entry("u1", AccountType::Buyer)));
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_remove_prunes_topics_and_users() {
        let mut registry = Registry::default();
        let id = SessionId::new();
        registry.insert(id, entry("u1", AccountType::Seller));
        registry.subscribe(id, "bids.a");
        registry.subscribe(id, "calls.b");
        assert_eq!(registry.topic_count(), 2);

        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.topics.len(), 2);
        assert_eq!(registry.topic_count(), 0);
        assert!(!registry.is_user_connected(&UserId::from("u1")));
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn test_topic_survives_while_other_subscribers_remain() {
        let mut registry = Registry::default();
        let a = SessionId::new();
        let b = SessionId::new();
        registry.insert(a, entry("u1", AccountType::Buyer));
        registry.insert(b, entry("u2", AccountType::Buyer));
        registry.subscribe(a, "calls.x");
        registry.subscribe(b, "calls.x");

        assert!(registry.unsubscribe(&a, "calls.x"));
        assert_eq!(registry.subscriber_count("calls.x"), 1);
        assert!(!registry.unsubscribe(&a, "calls.x"));

        assert!(registry.unsubscribe(&b, "calls.x"));
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut registry = Registry::default();
        let id = SessionId::new();
        registry.insert(id, entry("u1", AccountType::Buyer));
        assert!(registry.subscribe(id, "calls.x"));
        assert!(registry.subscribe(id, "calls.x"));
        assert_eq!(registry.subscriber_count("calls.x"), 1);
    }

    #[test]
    fn test_subscribe_unknown_session() {
        let mut registry = Registry::default();
        assert!(!registry.subscribe(SessionId::new(), "calls.x"));
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_sessions_of_user() {
        let mut registry = Registry::default();
        registry.insert(SessionId::new(), entry("u1", AccountType::Buyer));
        registry.insert(SessionId::new(), entry("u1", AccountType::Buyer));
        registry.insert(SessionId::new(), entry("u2", AccountType::Buyer));

        assert_eq!(registry.sessions_of(&UserId::from("u1")).count(), 2);
        assert_eq!(registry.sessions_of(&UserId::from("nobody")).count(), 0);
    }
}
