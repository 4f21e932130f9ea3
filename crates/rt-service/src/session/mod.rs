//! Client sessions.
//!
//! A session is one authenticated WebSocket connection. It is served by two
//! tasks:
//!
//! - the **reader** ([`reader`]) consumes inbound frames under a liveness
//!   deadline, answers pings, and forwards subscribe/unsubscribe/publish
//!   requests to the hub;
//! - the **writer** ([`writer`]) drains the session's bounded outbound queue
//!   to the socket and sends keepalive pings.
//!
//! Whichever task exits first records the close reason and cancels the
//! session token, which stops the other. The session is then unregistered
//! from the hub exactly once.
//!
//! # Lifecycle
//!
//! `Connecting -> Authenticated -> Active -> Closing -> Closed`

mod reader;
mod writer;

use crate::auth::Identity;
use crate::config::Config;
use crate::hub::{HubHandle, SessionRegistration};
use crate::observability::metrics;
use crate::protocol::{Envelope, EVENT_CONNECTED};
use admission::AdmissionController;
use axum::extract::ws::Message;
use common::types::SessionId;
use futures::{Sink, Stream};
use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Deadline for a single socket write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-session tuning.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub buffer_capacity: usize,
    pub keepalive_interval: Duration,
    pub liveness_timeout: Duration,
    pub write_timeout: Duration,
    /// Largest inbound message accepted by the upgrade.
    pub max_frame_bytes: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: crate::config::DEFAULT_SESSION_BUFFER_CAPACITY,
            keepalive_interval: Duration::from_secs(crate::config::DEFAULT_KEEPALIVE_INTERVAL_SECONDS),
            liveness_timeout: Duration::from_secs(crate::config::DEFAULT_LIVENESS_TIMEOUT_SECONDS),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_frame_bytes: crate::config::DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            buffer_capacity: config.session_buffer_capacity,
            keepalive_interval: config.keepalive_interval,
            liveness_timeout: config.liveness_timeout,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Authenticated = 1,
    Active = 2,
    Closing = 3,
    Closed = 4,
}

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Authenticated,
            2 => SessionState::Active,
            3 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Close frame or end of stream from the client.
    ClientClosed,
    /// No inbound frame within the liveness timeout.
    LivenessTimeout,
    /// The transport failed while reading.
    TransportError,
    /// A write failed or timed out.
    WriteFailed,
    /// The hub (or the server) is shutting down.
    Shutdown,
    /// Registration with the hub failed.
    RegistrationFailed,
}

impl CloseReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "client_closed",
            CloseReason::LivenessTimeout => "liveness_timeout",
            CloseReason::TransportError => "transport_error",
            CloseReason::WriteFailed => "write_failed",
            CloseReason::Shutdown => "shutdown",
            CloseReason::RegistrationFailed => "registration_failed",
        }
    }
}

/// State shared by a session's reader and writer.
#[derive(Debug)]
pub struct SessionShared {
    pub session_id: SessionId,
    pub identity: Identity,
    state: AtomicU8,
    close_reason: OnceLock<CloseReason>,
    cancel_token: CancellationToken,
}

impl SessionShared {
    #[must_use]
    pub fn new(session_id: SessionId, identity: Identity, cancel_token: CancellationToken) -> Self {
        Self {
            session_id,
            identity,
            state: AtomicU8::new(SessionState::Connecting as u8),
            close_reason: OnceLock::new(),
            cancel_token,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move forward to `next`. The state never moves backwards.
    pub fn advance(&self, next: SessionState) {
        self.state.fetch_max(next as u8, Ordering::SeqCst);
    }

    /// Begin closing. The first reason recorded wins.
    pub fn close(&self, reason: CloseReason) {
        let _ = self.close_reason.set(reason);
        self.advance(SessionState::Closing);
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

/// Collaborators a session talks to.
#[derive(Clone)]
pub struct SessionContext {
    pub hub: HubHandle,
    /// Per-user inbound frame limiter; `None` disables inbound limiting.
    pub ws_admission: Option<AdmissionController>,
}

/// Serve one authenticated connection until either side closes it.
///
/// `sink` and `stream` are the two halves of the socket. Returns the reason
/// the session ended.
pub async fn run_session<Si, St, E>(
    sink: Si,
    stream: St,
    identity: Identity,
    ctx: SessionContext,
    settings: SessionSettings,
) -> CloseReason
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display + Send,
    St: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let session_id = SessionId::new();
    let started = Instant::now();
    let shared = Arc::new(SessionShared::new(
        session_id,
        identity.clone(),
        ctx.hub.child_token(),
    ));
    let (outbound_tx, outbound_rx) = mpsc::channel(settings.buffer_capacity.max(1));

    let registration = SessionRegistration {
        session_id,
        user_id: identity.user_id.clone(),
        account_type: identity.account_type,
        outbound: outbound_tx.clone(),
    };
    if let Err(e) = ctx.hub.register(registration).await {
        warn!(
            target: "rt.session",
            session_id = %session_id,
            user_id = %identity.user_id,
            error = %e,
            "Session registration failed"
        );
        return CloseReason::RegistrationFailed;
    }
    shared.advance(SessionState::Authenticated);
    metrics::record_session_opened();

    let greeting = Envelope::system(
        EVENT_CONNECTED,
        Some(serde_json::json!({
            "session_id": session_id.to_string(),
            "user_id": identity.user_id.as_str(),
            "account_type": identity.account_type.as_str(),
        })),
    );
    let _ = outbound_tx.try_send(Arc::new(greeting));

    let writer = tokio::spawn(writer::write_loop(
        sink,
        outbound_rx,
        Arc::clone(&shared),
        settings.clone(),
    ));
    let reader = tokio::spawn(reader::read_loop(
        stream,
        Arc::clone(&shared),
        reader::ReaderContext {
            hub: ctx.hub.clone(),
            ws_admission: ctx.ws_admission.clone(),
            outbound: outbound_tx,
        },
        settings.liveness_timeout,
    ));
    shared.advance(SessionState::Active);

    info!(
        target: "rt.session",
        session_id = %session_id,
        user_id = %identity.user_id,
        account_type = identity.account_type.as_str(),
        "Session active"
    );

    for (task, handle) in [("reader", reader), ("writer", writer)] {
        if let Err(e) = handle.await {
            error!(
                target: "rt.session",
                session_id = %session_id,
                task,
                error = %e,
                "Session task terminated abnormally"
            );
            shared.close(CloseReason::TransportError);
        }
    }

    if let Err(e) = ctx.hub.unregister(session_id).await {
        debug!(
            target: "rt.session",
            session_id = %session_id,
            error = %e,
            "Unregister skipped, hub unavailable"
        );
    }
    shared.advance(SessionState::Closed);

    let reason = shared.close_reason().unwrap_or(CloseReason::Shutdown);
    let duration = started.elapsed();
    metrics::record_session_closed(reason.as_str(), duration);
    info!(
        target: "rt.session",
        session_id = %session_id,
        user_id = %identity.user_id,
        reason = reason.as_str(),
        duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        "Session closed"
    );

    reason
}
