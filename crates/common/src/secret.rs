//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for the Redis URL (which may embed a
//! password) and the JWT signing secret. `SecretString` implements `Debug`
//! with redaction, so any struct that derives `Debug` around one stays safe
//! to log through `tracing`.
//!
//! Values are zeroized on drop. Call `expose_secret()` only at the point of use
//! (opening the Redis client, building the JWT decoding key).
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let redis_url = SecretString::from("redis://:hunter2@cache:6379");
//! assert!(!format!("{redis_url:?}").contains("hunter2"));
//! assert!(redis_url.expose_secret().starts_with("redis://"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
