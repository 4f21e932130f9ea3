//! Test server harness for E2E testing
//!
//! Provides `TestRtServer` for spawning real realtime server instances in
//! tests. Counters live in an [`InMemoryCounterStore`] so no Redis is needed.

use crate::integrity::RecordingIntegrityService;
use crate::validator::StaticTokenValidator;
use admission::mock::InMemoryCounterStore;
use admission::{AdmissionController, KeyStrategy, RateLimitConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use rt_service::hub::{HubConfig, HubHandle};
use rt_service::observability::{metrics::init_metrics_recorder, HealthState};
use rt_service::routes::{self, AppState};
use rt_service::session::SessionSettings;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Knobs for [`TestRtServer::spawn_with`].
#[derive(Debug, Clone)]
pub struct TestServerOptions {
    pub http_limit: RateLimitConfig,
    pub ws_limit: Option<RateLimitConfig>,
    pub key_strategy: KeyStrategy,
    pub session_settings: SessionSettings,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            http_limit: RateLimitConfig::new(1000, 1000),
            ws_limit: None,
            key_strategy: KeyStrategy::global().by_ip(),
            session_settings: SessionSettings::default(),
        }
    }
}

/// Test harness for spawning the realtime service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() -> anyhow::Result<()> {
///     let server = TestRtServer::spawn().await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestRtServer {
    addr: SocketAddr,
    hub: HubHandle,
    store: Arc<InMemoryCounterStore>,
    integrity: Arc<RecordingIntegrityService>,
    _handle: JoinHandle<()>,
}

impl TestRtServer {
    /// Spawn with generous limits and the default token table.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(TestServerOptions::default()).await
    }

    /// Spawn a new test server instance.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Accept the tokens from [`StaticTokenValidator::with_defaults`]
    /// - Start the HTTP server in the background
    pub async fn spawn_with(options: TestServerOptions) -> Result<Self, anyhow::Error> {
        let store = Arc::new(InMemoryCounterStore::new());
        let integrity = Arc::new(RecordingIntegrityService::new());
        let hub = HubHandle::new(HubConfig::new("rt-test"));
        let health = Arc::new(HealthState::new());
        health.set_ready();

        let ws_admission = options
            .ws_limit
            .map(|limits| AdmissionController::with_store(Arc::clone(&store), limits));

        let state = Arc::new(AppState {
            hub: hub.clone(),
            admission: AdmissionController::with_store(Arc::clone(&store), options.http_limit),
            ws_admission,
            key_strategy: options.key_strategy,
            token_validator: Arc::new(StaticTokenValidator::with_defaults()),
            integrity: integrity.clone(),
            health,
            session_settings: options.session_settings,
        });

        // Initialize metrics recorder (may fail if already installed by another test)
        let metrics_handle = init_metrics_recorder()
            .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle());

        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            // Use into_make_service_with_connect_info to support SocketAddr extraction
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            hub,
            store,
            integrity,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket URL carrying `token` in the query string.
    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={}", self.addr, token)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The hub behind the server, for direct queries.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn store(&self) -> &Arc<InMemoryCounterStore> {
        &self.store
    }

    pub fn integrity(&self) -> &RecordingIntegrityService {
        &self.integrity
    }
}

impl Drop for TestRtServer {
    fn drop(&mut self) {
        self.hub.cancel();
        self._handle.abort();
    }
}
