//! Realtime Service
//!
//! WebSocket pub/sub hub and admin HTTP API for the call exchange.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Build admission controllers on the shared counter store
//! 4. Spawn the local bucket sweepers
//! 5. Start the hub coordinator
//! 6. Serve HTTP + WebSocket until a shutdown signal arrives

use admission::{spawn_sweeper, AdmissionController, RedisCounterStore};
use common::secret::ExposeSecret;
use rt_service::auth::JwtTokenValidator;
use rt_service::config::Config;
use rt_service::hub::{HubConfig, HubHandle};
use rt_service::integrity::TracingIntegrityService;
use rt_service::observability::{metrics::init_metrics_recorder, HealthState};
use rt_service::routes::{self, AppState};
use rt_service::session::SessionSettings;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often idle local buckets are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Local buckets untouched for this long are evicted.
const SWEEP_IDLE_AFTER: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rt_service=debug,admission=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Realtime Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        rate_limit_rps = config.rate_limit_rps,
        rate_limit_burst = config.rate_limit_burst,
        ws_messages_per_second = config.ws_messages_per_second,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to initialize metrics");
        e
    })?;

    // No connection is made here; the store connects on first use and the
    // local fallback answers until it does.
    let store = Arc::new(
        RedisCounterStore::new(config.redis_url.expose_secret()).map_err(|e| {
            error!(error = %e, "Failed to create counter store");
            e
        })?,
    );

    let background = CancellationToken::new();

    let admission = AdmissionController::with_store(Arc::clone(&store), config.http_rate_limit());
    spawn_sweeper(
        Arc::clone(admission.local_limiter()),
        SWEEP_INTERVAL,
        SWEEP_IDLE_AFTER,
        background.child_token(),
    );

    let ws_admission = config.ws_rate_limit().map(|limits| {
        let controller = AdmissionController::with_store(Arc::clone(&store), limits);
        spawn_sweeper(
            Arc::clone(controller.local_limiter()),
            SWEEP_INTERVAL,
            SWEEP_IDLE_AFTER,
            background.child_token(),
        );
        controller
    });

    let hub = HubHandle::new(HubConfig::new(config.instance_id.clone()));
    let health = Arc::new(HealthState::new());

    let state = Arc::new(AppState {
        hub: hub.clone(),
        admission,
        ws_admission,
        key_strategy: config.key_strategy(),
        token_validator: Arc::new(
            JwtTokenValidator::new(config.jwt_secret.clone()).with_clock_skew(config.jwt_clock_skew),
        ),
        integrity: Arc::new(TracingIntegrityService),
        health: Arc::clone(&health),
        session_settings: SessionSettings::from_config(&config),
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    health.set_ready();
    info!("Realtime Service listening on {}", addr);

    let shutdown_health = Arc::clone(&health);
    let shutdown_hub = hub.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        shutdown_health.set_not_ready();
        // Cancelling the hub closes every session with a Close frame, which
        // lets the upgraded connections finish and the server drain.
        shutdown_hub.cancel();
    })
    .await?;

    background.cancel();
    info!("Realtime Service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
