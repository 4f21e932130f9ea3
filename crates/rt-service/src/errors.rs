//! Realtime service error types.
//!
//! Errors surface two ways: as HTTP responses (via `IntoResponse`) on the
//! upgrade and admin routes, and as in-band `error` envelopes on a live
//! session (via [`RtError::error_code`] and [`RtError::client_message`]).
//! Client-facing messages are generic; details are logged server-side.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Realtime service error type.
///
/// HTTP mapping:
/// - Unauthorized: 401 Unauthorized
/// - PermissionDenied: 403 Forbidden
/// - UserNotConnected: 404 Not Found
/// - Conflict: 409 Conflict
/// - RateLimitExceeded: 429 Too Many Requests
/// - BadRequest: 400 Bad Request
/// - BufferFull, StoreUnavailable: 503 Service Unavailable
/// - Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum RtError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Outbound buffer full")]
    BufferFull,

    #[error("User not connected: {0}")]
    UserNotConnected(String),

    /// `retry_after_secs` of 0 omits `Retry-After`: the request exceeds
    /// the limit outright and waiting will not help.
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RtError {
    /// Stable error code for clients.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            RtError::Unauthorized(_) => "UNAUTHORIZED",
            RtError::PermissionDenied(_) => "PERMISSION_DENIED",
            RtError::BufferFull => "BUFFER_FULL",
            RtError::UserNotConnected(_) => "USER_NOT_CONNECTED",
            RtError::RateLimitExceeded { .. } => "RATE_LIMITED",
            RtError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            RtError::Conflict(_) => "CONFLICT",
            RtError::BadRequest(_) => "BAD_REQUEST",
            RtError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show a client.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RtError::Unauthorized(_) => "Invalid or missing credentials".to_string(),
            RtError::PermissionDenied(reason)
            | RtError::Conflict(reason)
            | RtError::BadRequest(reason) => reason.clone(),
            RtError::BufferFull => "Client is not keeping up".to_string(),
            RtError::UserNotConnected(_) => "User has no live sessions".to_string(),
            RtError::RateLimitExceeded { .. } => {
                "Too many requests. Please try again later.".to_string()
            }
            RtError::StoreUnavailable(_) => "Service temporarily unavailable".to_string(),
            RtError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            RtError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RtError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            RtError::UserNotConnected(_) => StatusCode::NOT_FOUND,
            RtError::Conflict(_) => StatusCode::CONFLICT,
            RtError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            RtError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RtError::BufferFull | RtError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RtError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RtError {
    fn into_response(self) -> Response {
        match &self {
            RtError::Internal(detail) => {
                tracing::error!(target: "rt.errors", error = %detail, "Internal error");
            }
            RtError::StoreUnavailable(detail) => {
                tracing::warn!(target: "rt.errors", error = %detail, "Store unavailable");
            }
            _ => {}
        }

        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code(),
                message: self.client_message(),
            },
        };

        let mut response = (status, Json(body)).into_response();

        match &self {
            RtError::Unauthorized(_) => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer realm=\"call-exchange\", error=\"invalid_token\""),
                );
            }
            RtError::RateLimitExceeded { retry_after_secs } if *retry_after_secs > 0 => {
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
            _ => {}
        }

        response
    }
}

impl From<common::jwt::JwtValidationError> for RtError {
    fn from(err: common::jwt::JwtValidationError) -> Self {
        RtError::Unauthorized(err.to_string())
    }
}

impl From<admission::AdmissionError> for RtError {
    fn from(err: admission::AdmissionError) -> Self {
        RtError::StoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display() {
        assert_eq!(
            RtError::PermissionDenied("bids.* requires seller".to_string()).to_string(),
            "Permission denied: bids.* requires seller"
        );
        assert_eq!(
            RtError::RateLimitExceeded { retry_after_secs: 1 }.to_string(),
            "Rate limit exceeded"
        );
        assert_eq!(RtError::BufferFull.to_string(), "Outbound buffer full");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(RtError::Unauthorized(String::new()).error_code(), "UNAUTHORIZED");
        assert_eq!(RtError::PermissionDenied(String::new()).error_code(), "PERMISSION_DENIED");
        assert_eq!(RtError::UserNotConnected(String::new()).error_code(), "USER_NOT_CONNECTED");
        assert_eq!(RtError::RateLimitExceeded { retry_after_secs: 1 }.error_code(), "RATE_LIMITED");
        assert_eq!(RtError::Internal(String::new()).error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_client_message_hides_internals() {
        let err = RtError::Internal("redis pool exhausted at 10.0.0.5".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = RtError::Unauthorized("signature mismatch".to_string());
        assert!(!err.client_message().contains("signature"));
    }

    #[tokio::test]
    async fn test_unauthorized_response() {
        let response = RtError::Unauthorized("expired".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_rate_limited_response_has_retry_after() {
        let response = RtError::RateLimitExceeded { retry_after_secs: 3 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "3");

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "RATE_LIMITED");
    }

    #[test]
    fn test_rate_limited_without_retry_after() {
        let response = RtError::RateLimitExceeded { retry_after_secs: 0 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(!response.headers().contains_key(header::RETRY_AFTER));
    }

    #[test]
    fn test_buffer_full_is_503() {
        assert_eq!(RtError::BufferFull.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(RtError::BufferFull.error_code(), "BUFFER_FULL");
    }

    #[tokio::test]
    async fn test_user_not_connected_is_404() {
        let response = RtError::UserNotConnected("u-1".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "USER_NOT_CONNECTED");
    }

    #[test]
    fn test_from_jwt_error() {
        let err: RtError = common::jwt::JwtValidationError::InvalidToken.into();
        assert!(matches!(err, RtError::Unauthorized(_)));
    }
}
