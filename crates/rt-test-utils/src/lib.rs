//! # Realtime Test Utilities
//!
//! Shared test utilities for the realtime service.
//!
//! This crate provides:
//! - Server test harness (`TestRtServer` for E2E tests)
//! - WebSocket client speaking the envelope protocol (`TestWsClient`)
//! - Static token validator (`StaticTokenValidator`)
//! - Recording audit sink (`RecordingIntegrityService`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rt_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestRtServer::spawn().await?;
//!     let mut client = TestWsClient::connect(&server.ws_url(TOKEN_BUYER)).await?;
//!
//!     let greeting = client.recv().await?;
//!     assert_eq!(greeting.event.as_deref(), Some("connected"));
//!     Ok(())
//! }
//! ```

pub mod integrity;
pub mod server_harness;
pub mod validator;
pub mod ws_client;

// Re-export commonly used items
pub use integrity::RecordingIntegrityService;
pub use server_harness::*;
pub use validator::*;
pub use ws_client::TestWsClient;
