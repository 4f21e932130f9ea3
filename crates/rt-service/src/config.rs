//! Realtime service configuration.
//!
//! Configuration is loaded from environment variables. Sensitive fields are
//! redacted in Debug output.

use admission::{KeyStrategy, RateLimitConfig};
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP + WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default requests per second (window limit and refill rate).
pub const DEFAULT_RATE_LIMIT_RPS: u32 = 100;

/// Default burst (token bucket capacity).
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 200;

/// Default rate limit key strategy.
pub const DEFAULT_RATE_LIMIT_KEY_STRATEGY: &str = "ip";

/// Default per-user inbound frame limit.
pub const DEFAULT_WS_MESSAGES_PER_SECOND: u32 = 20;

/// Default outbound buffer per session.
pub const DEFAULT_SESSION_BUFFER_CAPACITY: usize = 256;

/// Default keepalive ping interval in seconds.
pub const DEFAULT_KEEPALIVE_INTERVAL_SECONDS: u64 = 54;

/// Default read liveness timeout in seconds.
pub const DEFAULT_LIVENESS_TIMEOUT_SECONDS: u64 = 60;

/// Default maximum inbound frame size in bytes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Minimum JWT secret length in bytes.
pub const MIN_JWT_SECRET_BYTES: usize = 32;

/// Realtime service configuration.
#[derive(Clone)]
pub struct Config {
    /// Shared counter store URL.
    /// Protected by `SecretString` since it may carry credentials.
    pub redis_url: SecretString,

    /// HS256 secret for user tokens.
    pub jwt_secret: SecretString,

    /// Tolerance for `iat` in the future.
    pub jwt_clock_skew: Duration,

    /// HTTP + WebSocket bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Identifier for this instance, used in logs.
    pub instance_id: String,

    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,
    pub rate_limit_key_strategy: String,
    pub rate_limit_fast_path_threshold: u32,
    pub rate_limit_store_timeout: Duration,

    /// Per-user inbound frame limit; 0 disables inbound limiting.
    pub ws_messages_per_second: u32,

    pub session_buffer_capacity: usize,
    pub keepalive_interval: Duration,
    pub liveness_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_clock_skew", &self.jwt_clock_skew)
            .field("bind_address", &self.bind_address)
            .field("instance_id", &self.instance_id)
            .field("rate_limit_rps", &self.rate_limit_rps)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("rate_limit_key_strategy", &self.rate_limit_key_strategy)
            .field(
                "rate_limit_fast_path_threshold",
                &self.rate_limit_fast_path_threshold,
            )
            .field("rate_limit_store_timeout", &self.rate_limit_store_timeout)
            .field("ws_messages_per_second", &self.ws_messages_per_second)
            .field("session_buffer_capacity", &self.session_buffer_capacity)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("liveness_timeout", &self.liveness_timeout)
            .field("max_frame_bytes", &self.max_frame_bytes)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{name} must be a valid number, got '{raw}'"))
        }),
        None => Ok(default),
    }
}

fn require_positive<T: PartialOrd + Default>(name: &str, value: T) -> Result<T, ConfigError> {
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than zero"
        )))
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value is
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value is
    /// invalid.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(
            vars.get("REDIS_URL")
                .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?
                .clone(),
        );

        let jwt_secret_raw = vars
            .get("RT_JWT_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("RT_JWT_SECRET".to_string()))?;
        if jwt_secret_raw.len() < MIN_JWT_SECRET_BYTES {
            return Err(ConfigError::InvalidValue(format!(
                "RT_JWT_SECRET must be at least {MIN_JWT_SECRET_BYTES} bytes"
            )));
        }
        let jwt_secret = SecretString::from(jwt_secret_raw.clone());

        let clock_skew_seconds: u64 = parse_var(
            vars,
            "RT_JWT_CLOCK_SKEW_SECONDS",
            DEFAULT_CLOCK_SKEW.as_secs(),
        )?;
        if clock_skew_seconds > MAX_CLOCK_SKEW.as_secs() {
            return Err(ConfigError::InvalidValue(format!(
                "RT_JWT_CLOCK_SKEW_SECONDS must be at most {}",
                MAX_CLOCK_SKEW.as_secs()
            )));
        }

        let bind_address = vars
            .get("RT_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let instance_id = vars.get("RT_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            format!("rt-{}", suffix.get(..8).unwrap_or(&suffix))
        });

        let rate_limit_rps = require_positive(
            "RT_RATE_LIMIT_RPS",
            parse_var(vars, "RT_RATE_LIMIT_RPS", DEFAULT_RATE_LIMIT_RPS)?,
        )?;
        let rate_limit_burst = require_positive(
            "RT_RATE_LIMIT_BURST",
            parse_var(vars, "RT_RATE_LIMIT_BURST", DEFAULT_RATE_LIMIT_BURST)?,
        )?;

        let rate_limit_key_strategy = vars
            .get("RT_RATE_LIMIT_KEY_STRATEGY")
            .cloned()
            .unwrap_or_else(|| DEFAULT_RATE_LIMIT_KEY_STRATEGY.to_string());
        KeyStrategy::parse(&rate_limit_key_strategy)
            .map_err(|e| ConfigError::InvalidValue(format!("RT_RATE_LIMIT_KEY_STRATEGY: {e}")))?;

        let rate_limit_fast_path_threshold = parse_var(
            vars,
            "RT_RATE_LIMIT_FAST_PATH_THRESHOLD",
            admission::config::DEFAULT_FAST_PATH_THRESHOLD,
        )?;

        let store_timeout_ms: u64 = require_positive(
            "RT_RATE_LIMIT_STORE_TIMEOUT_MS",
            parse_var(vars, "RT_RATE_LIMIT_STORE_TIMEOUT_MS", 100)?,
        )?;

        let ws_messages_per_second = parse_var(
            vars,
            "RT_WS_MESSAGES_PER_SECOND",
            DEFAULT_WS_MESSAGES_PER_SECOND,
        )?;

        let session_buffer_capacity = require_positive(
            "RT_SESSION_BUFFER_CAPACITY",
            parse_var(
                vars,
                "RT_SESSION_BUFFER_CAPACITY",
                DEFAULT_SESSION_BUFFER_CAPACITY,
            )?,
        )?;

        let keepalive_seconds: u64 = require_positive(
            "RT_KEEPALIVE_INTERVAL_SECONDS",
            parse_var(
                vars,
                "RT_KEEPALIVE_INTERVAL_SECONDS",
                DEFAULT_KEEPALIVE_INTERVAL_SECONDS,
            )?,
        )?;
        let liveness_seconds: u64 = require_positive(
            "RT_LIVENESS_TIMEOUT_SECONDS",
            parse_var(
                vars,
                "RT_LIVENESS_TIMEOUT_SECONDS",
                DEFAULT_LIVENESS_TIMEOUT_SECONDS,
            )?,
        )?;
        // Probes must go out before the peer's silence is treated as dead
        if keepalive_seconds >= liveness_seconds {
            return Err(ConfigError::InvalidValue(format!(
                "RT_KEEPALIVE_INTERVAL_SECONDS ({keepalive_seconds}) must be less than \
                 RT_LIVENESS_TIMEOUT_SECONDS ({liveness_seconds})"
            )));
        }

        let max_frame_bytes = require_positive(
            "RT_MAX_FRAME_BYTES",
            parse_var(vars, "RT_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES)?,
        )?;

        Ok(Config {
            redis_url,
            jwt_secret,
            jwt_clock_skew: Duration::from_secs(clock_skew_seconds),
            bind_address,
            instance_id,
            rate_limit_rps,
            rate_limit_burst,
            rate_limit_key_strategy,
            rate_limit_fast_path_threshold,
            rate_limit_store_timeout: Duration::from_millis(store_timeout_ms),
            ws_messages_per_second,
            session_buffer_capacity,
            keepalive_interval: Duration::from_secs(keepalive_seconds),
            liveness_timeout: Duration::from_secs(liveness_seconds),
            max_frame_bytes,
        })
    }

    /// Limits for the HTTP admission middleware.
    #[must_use]
    pub fn http_rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.rate_limit_rps, self.rate_limit_burst)
            .with_fast_path_threshold(self.rate_limit_fast_path_threshold)
            .with_store_timeout(self.rate_limit_store_timeout)
    }

    /// Limits for inbound WebSocket frames, or `None` when disabled.
    #[must_use]
    pub fn ws_rate_limit(&self) -> Option<RateLimitConfig> {
        if self.ws_messages_per_second == 0 {
            return None;
        }
        Some(
            RateLimitConfig::new(self.ws_messages_per_second, self.ws_messages_per_second)
                .with_key_prefix("ratelimit:ws")
                .with_fast_path_threshold(self.rate_limit_fast_path_threshold)
                .with_store_timeout(self.rate_limit_store_timeout),
        )
    }

    /// The parsed key strategy. Validated at load time.
    #[must_use]
    pub fn key_strategy(&self) -> KeyStrategy {
        KeyStrategy::parse(&self.rate_limit_key_strategy).unwrap_or_else(|_| KeyStrategy::global().by_ip())
    }
}
