//! Common utilities and types shared across the call-exchange realtime components.

#![warn(clippy::pedantic)]

/// Module for identifiers and account types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limits, user claims, iat validation)
pub mod jwt;
