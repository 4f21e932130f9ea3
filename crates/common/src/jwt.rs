//! JWT utilities for user tokens presented at the WebSocket upgrade.
//!
//! - Size limit checked before any parsing
//! - HS256 user tokens carrying the marketplace account type
//! - `iat` clock-skew validation
//! - The `sub` field of [`UserClaims`] is redacted in Debug output
//!
//! Error messages are intentionally generic; details go to debug logs.

use crate::types::{AccountType, UserId};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Tokens larger than this are rejected before base64 decoding or signature
/// verification.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default JWT clock skew tolerance (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Signature, structure or expiry check failed.
    #[error("The access token is invalid or expired")]
    InvalidToken,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Claims Types
// =============================================================================

/// Claims carried by a marketplace user token.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// Subject (user id) - redacted in Debug output.
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Account type used for topic authorization.
    pub account_type: AccountType,
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("account_type", &self.account_type)
            .finish()
    }
}

impl UserClaims {
    /// The user id carried in `sub`.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        UserId(self.sub.clone())
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Verify an HS256 user token and return its claims.
///
/// Checks, in order: size limit, signature + `exp` (via `jsonwebtoken`),
/// then `iat` against `clock_skew`.
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `InvalidToken` - bad structure, signature, expiry or claims shape
/// - `IatTooFarInFuture` - `iat` beyond the allowed skew
pub fn decode_user_claims(
    token: &str,
    secret: &[u8],
    clock_skew: Duration,
) -> Result<UserClaims, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "sub"]);

    let data = decode::<UserClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| {
            tracing::debug!(target: "common.jwt", error = %e, "Token rejected: verification failed");
            JwtValidationError::InvalidToken
        })?;

    validate_iat(data.claims.iat, clock_skew)?;

    Ok(data.claims)
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if the iat timestamp is more than
/// `clock_skew` in the future.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Safe cast: clock_skew is bounded by MAX_CLOCK_SKEW at configuration time
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"an-hs256-test-secret-of-32-bytes!!";

    fn sign(claims: &UserClaims, secret: &[u8]) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    fn claims(account_type: AccountType) -> UserClaims {
        let now = chrono::Utc::now().timestamp();
        UserClaims {
            sub: "user-123".to_string(),
            exp: now + 3600,
            iat: now,
            account_type,
        }
    }

    #[test]
    fn test_decode_valid_token() {
        let token = sign(&claims(AccountType::Seller), SECRET);
        let decoded = decode_user_claims(&token, SECRET, DEFAULT_CLOCK_SKEW).unwrap();

        assert_eq!(decoded.sub, "user-123");
        assert_eq!(decoded.account_type, AccountType::Seller);
        assert_eq!(decoded.user_id(), UserId::from("user-123"));
    }

    #[test]
    fn test_decode_rejects_wrong_secret() {
        let token = sign(&claims(AccountType::Buyer), SECRET);
        let result = decode_user_claims(&token, b"some-other-secret-of-32-bytes!!!!", DEFAULT_CLOCK_SKEW);
        assert_eq!(result.unwrap_err(), JwtValidationError::InvalidToken);
    }

    #[test]
    fn test_decode_rejects_expired_token() {
        let mut expired = claims(AccountType::Buyer);
        expired.exp = chrono::Utc::now().timestamp() - 3600;
        expired.iat = expired.exp - 60;
        let token = sign(&expired, SECRET);

        let result = decode_user_claims(&token, SECRET, DEFAULT_CLOCK_SKEW);
        assert_eq!(result.unwrap_err(), JwtValidationError::InvalidToken);
    }

    #[test]
    fn test_decode_rejects_oversized_token() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        let result = decode_user_claims(&token, SECRET, DEFAULT_CLOCK_SKEW);
        assert_eq!(result.unwrap_err(), JwtValidationError::TokenTooLarge);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = decode_user_claims("not.a.jwt", SECRET, DEFAULT_CLOCK_SKEW);
        assert_eq!(result.unwrap_err(), JwtValidationError::InvalidToken);
    }

    #[test]
    fn test_decode_rejects_future_iat() {
        let mut future = claims(AccountType::Buyer);
        future.iat = chrono::Utc::now().timestamp() + 3600;
        future.exp = future.iat + 3600;
        let token = sign(&future, SECRET);

        let result = decode_user_claims(&token, SECRET, DEFAULT_CLOCK_SKEW);
        assert_eq!(result.unwrap_err(), JwtValidationError::IatTooFarInFuture);
    }

    #[test]
    fn test_validate_iat_boundaries() {
        let now = 1_700_000_000;
        let skew = Duration::from_secs(300);

        assert!(validate_iat_at(now, skew, now).is_ok());
        assert!(validate_iat_at(now + 300, skew, now).is_ok());
        assert_eq!(
            validate_iat_at(now + 301, skew, now),
            Err(JwtValidationError::IatTooFarInFuture)
        );
        assert!(validate_iat_at(now - 86_400, skew, now).is_ok());
    }

    #[test]
    fn test_claims_debug_redacts_sub() {
        let debug_str = format!("{:?}", claims(AccountType::Admin));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("user-123"));
        assert!(debug_str.contains("Admin"));
    }
}
