//! Token validator with a fixed token table.

use async_trait::async_trait;
use common::types::AccountType;
use rt_service::auth::{Identity, TokenValidator};
use rt_service::errors::RtError;
use std::collections::HashMap;

pub const TOKEN_ADMIN: &str = "admin-token";
pub const TOKEN_SELLER: &str = "seller-token";
pub const TOKEN_BUYER: &str = "buyer-token";

pub const ADMIN_ID: &str = "admin-1";
pub const SELLER_ID: &str = "seller-1";
pub const BUYER_ID: &str = "buyer-1";

/// Accepts exactly the tokens it was given.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenValidator {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// One admin, one seller and one buyer (`TOKEN_*` / `*_ID`).
    pub fn with_defaults() -> Self {
        Self::new()
            .with_token(TOKEN_ADMIN, Identity::new(ADMIN_ID, AccountType::Admin))
            .with_token(TOKEN_SELLER, Identity::new(SELLER_ID, AccountType::Seller))
            .with_token(TOKEN_BUYER, Identity::new(BUYER_ID, AccountType::Buyer))
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<Identity, RtError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| RtError::Unauthorized("Invalid token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_known_and_unknown_tokens() {
        let validator = StaticTokenValidator::with_defaults();

        let seller = validator.validate(TOKEN_SELLER).await.unwrap();
        assert_eq!(seller.user_id.as_str(), SELLER_ID);
        assert_eq!(seller.account_type, AccountType::Seller);

        assert!(matches!(
            validator.validate("nope").await,
            Err(RtError::Unauthorized(_))
        ));
    }
}
