//! Caller authentication.
//!
//! Two layers share one [`AuthState`]:
//!
//! - [`resolve_identity`] runs ahead of the rate limiter. It looks for a
//!   credential (`Authorization: Bearer` or the `token` query parameter),
//!   and stores the [`Identity`] in request extensions when it validates.
//!   It never rejects, so unauthenticated traffic still reaches admission
//!   control.
//! - [`require_admin`] runs after the rate limiter on the admin routes and
//!   rejects anything that is not an authenticated admin.

use crate::auth::{Identity, TokenValidator};
use crate::errors::RtError;
use axum::{
    extract::{Query, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Clone)]
pub struct AuthState {
    pub token_validator: Arc<dyn TokenValidator>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

fn query_token(req: &Request) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(query)| query.token)
        .filter(|token| !token.is_empty())
}

/// Attach the caller's [`Identity`] when the request carries a valid
/// credential. Invalid or missing credentials pass through untouched.
#[instrument(skip_all, name = "rt.middleware.identity")]
pub async fn resolve_identity(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = bearer_token(&req)
        .map(str::to_string)
        .or_else(|| query_token(&req));

    if let Some(token) = token {
        match state.token_validator.validate(&token).await {
            Ok(identity) => {
                req.extensions_mut().insert(identity);
            }
            Err(e) => {
                debug!(target: "rt.middleware.auth", error = %e, "Credential did not validate");
            }
        }
    }

    next.run(req).await
}

/// Rejects with 401 when the token is missing or invalid and 403 when the
/// caller is not an admin.
///
/// Reuses the identity [`resolve_identity`] attached, if any.
#[instrument(skip_all, name = "rt.middleware.auth")]
pub async fn require_admin(
    State(state): State<Arc<AuthState>>,
    req: Request,
    next: Next,
) -> Result<Response, RtError> {
    if let Some(identity) = req.identity().cloned() {
        return admit_admin(identity, req, next).await;
    }

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            debug!(target: "rt.middleware.auth", "Missing Authorization header");
            RtError::Unauthorized("Missing Authorization header".to_string())
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        debug!(target: "rt.middleware.auth", "Invalid Authorization header format");
        RtError::Unauthorized("Invalid Authorization header format".to_string())
    })?;

    let identity = state.token_validator.validate(token).await?;
    admit_admin(identity, req, next).await
}

async fn admit_admin(identity: Identity, mut req: Request, next: Next) -> Result<Response, RtError> {
    if !identity.is_admin() {
        warn!(
            target: "rt.middleware.auth",
            user_id = %identity.user_id,
            account_type = identity.account_type.as_str(),
            "Non-admin caller rejected"
        );
        return Err(RtError::PermissionDenied(
            "Admin account required".to_string(),
        ));
    }

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Access to the authenticated caller from request extensions.
pub trait IdentityExt {
    /// `None` if no layer authenticated this request.
    fn identity(&self) -> Option<&Identity>;
}

impl<B> IdentityExt for axum::http::Request<B> {
    fn identity(&self) -> Option<&Identity> {
        self.extensions().get::<Identity>()
    }
}
