//! Topic authorization.
//!
//! | Prefix   | Who may subscribe or publish        |
//! |----------|-------------------------------------|
//! | `calls.` | every account type                  |
//! | `bids.`  | sellers                             |
//! | `user.`  | only the user named by the suffix   |
//! | other    | nobody                              |
//!
//! Admin accounts may use any non-empty topic.

use common::types::{AccountType, UserId};

pub const CALLS_PREFIX: &str = "calls.";
pub const BIDS_PREFIX: &str = "bids.";
pub const USER_PREFIX: &str = "user.";

/// Whether `account_type`/`user_id` may subscribe (or publish) to `topic`.
#[must_use]
pub fn can_subscribe(account_type: AccountType, user_id: &UserId, topic: &str) -> bool {
    if topic.is_empty() {
        return false;
    }
    if account_type == AccountType::Admin {
        return true;
    }

    if let Some(rest) = topic.strip_prefix(CALLS_PREFIX) {
        return !rest.is_empty();
    }
    if let Some(rest) = topic.strip_prefix(BIDS_PREFIX) {
        return !rest.is_empty() && account_type == AccountType::Seller;
    }
    if let Some(owner) = topic.strip_prefix(USER_PREFIX) {
        return !owner.is_empty() && owner == user_id.as_str();
    }

    false
}
