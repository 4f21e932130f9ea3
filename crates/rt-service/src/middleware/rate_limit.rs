//! HTTP admission middleware.
//!
//! Derives the rate limit key from the configured [`KeyStrategy`] using the
//! peer address (`ConnectInfo`), the authenticated identity (if an earlier
//! layer stored one) and the matched route. Every response carries
//! `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`;
//! a denial short-circuits with 429 and `Retry-After`.

use crate::errors::RtError;
use crate::middleware::auth::IdentityExt;
use crate::observability::metrics;
use admission::{AdmissionController, Decision, KeyContext, KeyStrategy};
use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const HEADER_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const HEADER_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const HEADER_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Clone)]
pub struct RateLimitState {
    pub admission: AdmissionController,
    pub key_strategy: KeyStrategy,
}

#[instrument(skip_all, name = "rt.middleware.rate_limit")]
pub async fn enforce(State(state): State<Arc<RateLimitState>>, req: Request, next: Next) -> Response {
    let key = state.key_strategy.derive(&key_context(&req));
    let decision = state.admission.check_limit(&key).await;

    if !decision.allowed {
        metrics::record_admission_rejected("http");
        debug!(
            target: "rt.middleware.rate_limit",
            key = %key,
            limit = decision.limit,
            retry_after_ms = u64::try_from(decision.retry_after.as_millis()).unwrap_or(u64::MAX),
            source = decision.source.as_str(),
            "Request rate limited"
        );
        let mut response = RtError::RateLimitExceeded {
            retry_after_secs: decision.retry_after_secs(),
        }
        .into_response();
        apply_headers(response.headers_mut(), &decision);
        return response;
    }

    let mut response = next.run(req).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

fn key_context(req: &Request) -> KeyContext {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_string(), |p| p.as_str().to_string());

    KeyContext {
        remote_addr: req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip()),
        user_id: req.identity().map(|identity| identity.user_id.to_string()),
        method: Some(req.method().to_string()),
        path: Some(path),
    }
}

/// Attach the `X-RateLimit-*` headers for `decision`.
pub fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(HEADER_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(HEADER_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(HEADER_RESET, HeaderValue::from(decision.reset_epoch_secs()));
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use admission::mock::{InMemoryCounterStore, ManualClock};
    use admission::{LocalLimiter, RateLimitConfig, StoreLimiter};
    use axum::{
        body::Body,
        http::{header, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    fn limited_app(rps: u32, store: Arc<InMemoryCounterStore>) -> Router {
        limited_app_with_burst(rps, rps, store)
    }

    fn limited_app_with_burst(rps: u32, burst: u32, store: Arc<InMemoryCounterStore>) -> Router {
        let config = RateLimitConfig::new(rps, burst);
        let clock = ManualClock::new(1_700_000_000_500);
        let primary = StoreLimiter::new(store, config.clone()).with_clock(clock.clock());
        let state = Arc::new(RateLimitState {
            admission: AdmissionController::new(
                Arc::new(primary),
                Arc::new(LocalLimiter::new(&config)),
                &config,
            ),
            key_strategy: KeyStrategy::global().by_ip(),
        });
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .route_layer(middleware::from_fn_with_state(state, enforce))
    }

    fn request() -> axum::http::Request<Body> {
        let mut req = axum::http::Request::builder()
            .uri("/ping")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 5555))));
        req
    }

    #[tokio::test]
    async fn test_allowed_requests_carry_headers() {
        let app = limited_app(2, Arc::new(InMemoryCounterStore::new()));

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers().get(HEADER_LIMIT).unwrap(), "2");
        assert_eq!(first.headers().get(HEADER_REMAINING).unwrap(), "1");
        assert_eq!(first.headers().get(HEADER_RESET).unwrap(), "1700000001");

        let second = app.oneshot(request()).await.unwrap();
        assert_eq!(second.headers().get(HEADER_REMAINING).unwrap(), "0");
    }

    #[tokio::test]
    async fn test_denied_request_is_429_with_retry_after() {
        let app = limited_app(1, Arc::new(InMemoryCounterStore::new()));

        let _ = app.clone().oneshot(request()).await.unwrap();
        let denied = app.oneshot(request()).await.unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(denied.headers().get(header::RETRY_AFTER).unwrap(), "1");
        assert_eq!(denied.headers().get(HEADER_REMAINING).unwrap(), "0");
    }

    #[tokio::test]
    async fn test_key_uses_peer_address() {
        let store = Arc::new(InMemoryCounterStore::new());
        let app = limited_app(5, Arc::clone(&store));
        let _ = app.oneshot(request()).await.unwrap();
        assert_eq!(
            store.counter("ratelimit:ip:10.0.0.7:fixed:1700000000"),
            Some(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_header_is_stable_when_store_drops_out() {
        let store = Arc::new(InMemoryCounterStore::new());
        let app = limited_app_with_burst(5, 20, Arc::clone(&store));

        let healthy = app.clone().oneshot(request()).await.unwrap();
        store.set_available(false);
        let degraded = app.oneshot(request()).await.unwrap();

        assert_eq!(healthy.headers().get(HEADER_LIMIT).unwrap(), "5");
        assert_eq!(degraded.headers().get(HEADER_LIMIT).unwrap(), "5");
        let remaining: u32 = degraded
            .headers()
            .get(HEADER_REMAINING)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(remaining <= 5);
    }

    #[test]
    fn test_key_context_prefers_matched_path() {
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/v1/internal/topics/calls.a/events")
            .body(Body::empty())
            .unwrap();
        let ctx = key_context(&req);
        assert_eq!(ctx.method.as_deref(), Some("POST"));
        assert_eq!(ctx.path.as_deref(), Some("/v1/internal/topics/calls.a/events"));
        assert!(ctx.remote_addr.is_none());
        assert!(ctx.user_id.is_none());
    }
}
