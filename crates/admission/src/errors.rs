//! Admission error types.
//!
//! Every variant describes a failure to reach or use the shared store. The
//! [`AdmissionController`](crate::AdmissionController) recovers all of them
//! through the local limiter, so none reach clients.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The shared store could not be reached or rejected the command.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store did not answer within the configured deadline.
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store answered with something the limiter cannot interpret.
    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),
}

impl AdmissionError {
    /// Short label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            AdmissionError::StoreUnavailable(_) => "unavailable",
            AdmissionError::Timeout(_) => "timeout",
            AdmissionError::UnexpectedReply(_) => "unexpected_reply",
        }
    }
}

impl From<redis::RedisError> for AdmissionError {
    fn from(err: redis::RedisError) -> Self {
        AdmissionError::StoreUnavailable(err.to_string())
    }
}
