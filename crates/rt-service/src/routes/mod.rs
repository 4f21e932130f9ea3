//! HTTP routes for the realtime service.
//!
//! Defines the Axum router and application state.

use crate::auth::TokenValidator;
use crate::handlers;
use crate::hub::HubHandle;
use crate::integrity::IntegrityService;
use crate::middleware::{
    enforce_rate_limit, http_metrics_middleware, require_admin, resolve_identity, AuthState,
    RateLimitState,
};
use crate::observability::{health_router, metrics::metrics_handler, HealthState};
use crate::session::SessionSettings;
use admission::{AdmissionController, KeyStrategy};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hub handle; sessions and admin endpoints both publish through it.
    pub hub: HubHandle,

    /// HTTP request admission.
    pub admission: AdmissionController,

    /// Inbound frame admission, `None` when per-session limiting is off.
    pub ws_admission: Option<AdmissionController>,

    /// How HTTP rate limit keys are derived.
    pub key_strategy: KeyStrategy,

    /// Validates `/ws` credentials and admin bearer tokens.
    pub token_validator: Arc<dyn TokenValidator>,

    /// Sink for admin audit records.
    pub integrity: Arc<dyn IntegrityService>,

    /// Liveness and readiness flags.
    pub health: Arc<HealthState>,

    pub session_settings: SessionSettings,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health`, `/ready` - probes, public
/// - `/metrics` - Prometheus scrape endpoint, public
/// - `/ws` - WebSocket upgrade, rate limited, token in the query string
/// - `/v1/internal/...` and `/v1/admin/...` - rate limited, then admin bearer auth
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let rate_limit_state = Arc::new(RateLimitState {
        admission: state.admission.clone(),
        key_strategy: state.key_strategy.clone(),
    });
    let auth_state = Arc::new(AuthState {
        token_validator: Arc::clone(&state.token_validator),
    });

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    // route_layer order: the last one added runs first. A valid credential
    // is resolved before the limiter so it can key on the caller's id; bad
    // or missing credentials are still counted and only
    // rejected afterwards.
    let ws_routes = Router::new()
        .route("/ws", get(handlers::ws_upgrade))
        .route_layer(middleware::from_fn_with_state(
            rate_limit_state.clone(),
            enforce_rate_limit,
        ))
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            resolve_identity,
        ))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route(
            "/v1/internal/topics/:topic/events",
            post(handlers::broadcast_to_topic),
        )
        .route(
            "/v1/internal/topics/:topic/subscribers",
            get(handlers::topic_subscribers),
        )
        .route(
            "/v1/internal/users/:user_id/events",
            post(handlers::send_to_user),
        )
        .route(
            "/v1/admin/rate-limits/:key",
            delete(handlers::reset_rate_limit),
        )
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_admin,
        ))
        .route_layer(middleware::from_fn_with_state(
            rate_limit_state,
            enforce_rate_limit,
        ))
        .route_layer(middleware::from_fn_with_state(auth_state, resolve_identity))
        .with_state(state.clone());

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    health_router(Arc::clone(&state.health))
        .merge(metrics_routes)
        .merge(ws_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::errors::RtError;
    use crate::hub::HubConfig;
    use crate::integrity::TracingIntegrityService;
    use admission::{mock::InMemoryCounterStore, RateLimitConfig};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use common::types::AccountType;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::util::ServiceExt;

    struct AdminOnly;

    #[async_trait]
    impl TokenValidator for AdminOnly {
        async fn validate(&self, token: &str) -> Result<Identity, RtError> {
            match token {
                "admin" => Ok(Identity::new("ops-1", AccountType::Admin)),
                "buyer" => Ok(Identity::new("buyer-1", AccountType::Buyer)),
                _ => Err(RtError::Unauthorized("Invalid token".to_string())),
            }
        }
    }

    fn test_router() -> Router {
        router_with(
            Arc::new(InMemoryCounterStore::new()),
            RateLimitConfig::new(100, 100),
        )
    }

    fn router_with(store: Arc<InMemoryCounterStore>, limits: RateLimitConfig) -> Router {
        let state = Arc::new(AppState {
            hub: HubHandle::new(HubConfig::new("rt-test")),
            admission: AdmissionController::with_store(store, limits),
            ws_admission: None,
            key_strategy: KeyStrategy::global().by_ip(),
            token_validator: Arc::new(AdminOnly),
            integrity: Arc::new(TracingIntegrityService),
            health: Arc::new(HealthState::new()),
            session_settings: SessionSettings::default(),
        });
        build_routes(state, PrometheusBuilder::new().build_recorder().handle())
    }

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[tokio::test]
    async fn test_subscriber_count_requires_admin() {
        let router = test_router();

        let anonymous = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/internal/topics/calls.new/subscribers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let buyer = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/internal/topics/calls.new/subscribers")
                    .header("authorization", "Bearer buyer")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(buyer.status(), StatusCode::FORBIDDEN);

        let admin = router
            .oneshot(
                Request::builder()
                    .uri("/v1/internal/topics/calls.new/subscribers")
                    .header("authorization", "Bearer admin")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(admin.status(), StatusCode::OK);
        assert!(admin.headers().contains_key("x-ratelimit-limit"));
    }

    #[tokio::test]
    async fn test_ws_without_token_is_unauthorized() {
        let response = test_router()
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_credentials_count_against_the_limit() {
        // Store down: the local bucket answers, and paused time keeps it
        // from refilling between calls
        let store = Arc::new(InMemoryCounterStore::new());
        store.set_available(false);
        let router = router_with(Arc::clone(&store), RateLimitConfig::new(2, 2));

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let response = router
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/v1/internal/topics/calls.new/subscribers")
                        .header("authorization", "Bearer guess")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert!(response.headers().contains_key("x-ratelimit-limit"));
            statuses.push(response.status());
        }

        assert_eq!(
            statuses,
            vec![
                StatusCode::UNAUTHORIZED,
                StatusCode::UNAUTHORIZED,
                StatusCode::TOO_MANY_REQUESTS
            ]
        );
    }
}
