//! HTTP handlers.

pub mod admin;
pub mod ws;

pub use admin::{broadcast_to_topic, reset_rate_limit, send_to_user, topic_subscribers};
pub use ws::ws_upgrade;
