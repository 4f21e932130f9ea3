//! Realtime service library.
//!
//! The realtime layer of the call exchange: a WebSocket pub/sub hub that
//! fans marketplace events out to connected buyers, sellers and admins, and
//! an HTTP surface guarded by the distributed [`admission`] controller.
//!
//! # Architecture
//!
//! ```text
//! /ws ──► resolve_identity ──► rate limit ──► session (reader, writer) ──► HubHandle ──► HubActor
//!                                                ▲                                    │
//!                                                └────── bounded outbound buffer ◄────┘
//!
//! /v1/internal, /v1/admin ──► resolve_identity ──► rate limit ──► require_admin ──► handlers
//! ```
//!
//! Mutations of the registry are serialized through the hub's mailbox;
//! read-only queries take the registry's read lock directly.
//!
//! # Modules
//!
//! - `auth` - Token validation capability and JWT implementation
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - WebSocket upgrade and admin endpoints
//! - `hub` - Registry coordinator and subscription policy
//! - `integrity` - Audit records for admin actions
//! - `middleware` - Admin auth, admission, HTTP metrics
//! - `observability` - Health probes and Prometheus metrics
//! - `protocol` - Wire envelope and message types
//! - `routes` - Axum router and application state
//! - `session` - Per-connection reader and writer tasks

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod hub;
pub mod integrity;
pub mod middleware;
pub mod observability;
pub mod protocol;
pub mod routes;
pub mod session;
