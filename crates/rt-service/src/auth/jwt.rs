use super::{Identity, TokenValidator};
use crate::errors::RtError;
use async_trait::async_trait;
use common::jwt::{decode_user_claims, DEFAULT_CLOCK_SKEW};
use common::secret::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::debug;

/// HS256 user-token validator.
pub struct JwtTokenValidator {
    secret: SecretString,
    clock_skew: Duration,
}

impl JwtTokenValidator {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }

    #[must_use]
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn validate(&self, token: &str) -> Result<Identity, RtError> {
        let claims = decode_user_claims(
            token,
            self.secret.expose_secret().as_bytes(),
            self.clock_skew,
        )
        .map_err(|e| {
            debug!(target: "rt.auth", error = %e, "Token validation failed");
            RtError::from(e)
        })?;

        Ok(Identity {
            user_id: claims.user_id(),
            account_type: claims.account_type,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::jwt::UserClaims;
    use common::types::AccountType;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-that-is-at-least-32-bytes-long";

    fn sign(claims: &UserClaims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(sub: &str, account_type: AccountType, exp_offset: i64) -> UserClaims {
        let now = chrono::Utc::now().timestamp();
        UserClaims {
            sub: sub.to_string(),
            exp: now + exp_offset,
            iat: now,
            account_type,
        }
    }

    fn validator() -> JwtTokenValidator {
        JwtTokenValidator::new(SecretString::from(SECRET))
    }

    #[tokio::test]
    async fn test_valid_token() {
        let token = sign(&claims("seller-1", AccountType::Seller, 3600), SECRET);
        let identity = validator().validate(&token).await.unwrap();
        assert_eq!(identity, Identity::new("seller-1", AccountType::Seller));
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let token = sign(
            &claims("seller-1", AccountType::Seller, 3600),
            "another-secret-that-is-also-32-bytes-long",
        );
        let result = validator().validate(&token).await;
        assert!(matches!(result, Err(RtError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let token = sign(&claims("buyer-1", AccountType::Buyer, -3600), SECRET);
        let result = validator().validate(&token).await;
        assert!(matches!(result, Err(RtError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_garbage_rejected() {
        let result = validator().validate("not-a-jwt").await;
        assert!(matches!(result, Err(RtError::Unauthorized(_))));
    }
}
