//! Credential validation.
//!
//! The realtime service never issues tokens; it only validates them through
//! an injected [`TokenValidator`]. Production uses [`JwtTokenValidator`];
//! tests substitute a static map.

mod jwt;

pub use jwt::JwtTokenValidator;

use crate::errors::RtError;
use async_trait::async_trait;
use common::types::{AccountType, UserId};

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub account_type: AccountType,
}

impl Identity {
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, account_type: AccountType) -> Self {
        Self {
            user_id: user_id.into(),
            account_type,
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.account_type == AccountType::Admin
    }
}

/// Resolves a bearer credential to an [`Identity`].
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// # Errors
    ///
    /// `Unauthorized` for any credential that does not resolve to a user.
    async fn validate(&self, token: &str) -> Result<Identity, RtError>;
}
