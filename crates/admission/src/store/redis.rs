//! Redis-backed counter store.
//!
//! The connection is opened lazily on first use and managed by a
//! `ConnectionManager`, which reconnects on its own after a failure. While
//! Redis is down calls fail and the controller falls back.

use super::{lua_scripts, BucketOutcome, BucketParams, CounterStore, SlidingSnapshot};
use crate::errors::AdmissionError;
use ::redis::aio::{ConnectionManager, ConnectionManagerConfig};
use ::redis::{Client, Script};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

// A failed connect is retried once; the next request tries again.
const CONNECT_BACKOFF_BASE: u64 = 2;
const CONNECT_BACKOFF_FACTOR_MS: u64 = 10;
const CONNECT_RETRIES: usize = 1;

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[allow(clippy::cast_possible_truncation)]
fn parse_score(raw: &str) -> Result<i64, AdmissionError> {
    raw.parse::<f64>()
        .map(|score| score as i64)
        .map_err(|_| AdmissionError::UnexpectedReply(format!("non-numeric sliding score {raw}")))
}

/// Counter store on a shared Redis.
pub struct RedisCounterStore {
    client: Client,
    connection: RwLock<Option<ConnectionManager>>,
    increment_window_script: Script,
    token_bucket_script: Script,
}

impl RedisCounterStore {
    /// Create a store for `redis_url`. No connection is attempted here.
    ///
    /// # Errors
    ///
    /// Returns `AdmissionError::StoreUnavailable` if the URL cannot be parsed.
    pub fn new(redis_url: &str) -> Result<Self, AdmissionError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Do NOT log redis_url, it may carry credentials
            warn!(
                target: "admission.store",
                error = %e,
                "Failed to open Redis client"
            );
            AdmissionError::StoreUnavailable(format!("Failed to open Redis client: {e}"))
        })?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            increment_window_script: Script::new(lua_scripts::INCREMENT_WINDOW),
            token_bucket_script: Script::new(lua_scripts::TOKEN_BUCKET),
        })
    }

    /// Get the shared connection, establishing it on first use.
    async fn connection(&self) -> Result<ConnectionManager, AdmissionError> {
        {
            let guard = self.connection.read().await;
            if let Some(conn) = guard.as_ref() {
                return Ok(conn.clone());
            }
        }

        let mut guard = self.connection.write().await;
        // Another task may have connected while we waited for the write lock
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = ConnectionManager::new_with_config(self.client.clone(), connection_config())
        .await
        .map_err(|e| {
            warn!(
                target: "admission.store",
                error = %e,
                "Failed to connect to Redis"
            );
            AdmissionError::StoreUnavailable(format!("Failed to connect to Redis: {e}"))
        })?;

        debug!(target: "admission.store", "Connected to Redis");
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

fn connection_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_exponent_base(CONNECT_BACKOFF_BASE)
        .set_factor(CONNECT_BACKOFF_FACTOR_MS)
        .set_number_of_retries(CONNECT_RETRIES)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    #[instrument(skip_all)]
    async fn increment_window(&self, key: &str, ttl: Duration) -> Result<u64, AdmissionError> {
        let mut conn = self.connection().await?;
        let count: i64 = self
            .increment_window_script
            .key(key)
            .arg(millis(ttl))
            .invoke_async(&mut conn)
            .await?;

        u64::try_from(count)
            .map_err(|_| AdmissionError::UnexpectedReply(format!("negative window count {count}")))
    }

    #[instrument(skip_all)]
    async fn sliding_snapshot(&self, key: &str, cutoff_ms: i64) -> Result<SlidingSnapshot, AdmissionError> {
        let mut conn = self.connection().await?;

        let (count, oldest): (u64, Vec<String>) = ::redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(cutoff_ms)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;

        // WITHSCORES replies [member, score]
        let oldest_ms = match oldest.get(1) {
            Some(score) => Some(parse_score(score)?),
            None => None,
        };

        Ok(SlidingSnapshot { count, oldest_ms })
    }

    #[instrument(skip_all, fields(members = members.len()))]
    async fn add_sliding(
        &self,
        key: &str,
        score_ms: i64,
        members: &[String],
        ttl: Duration,
    ) -> Result<(), AdmissionError> {
        if members.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection().await?;
        let mut pipe = ::redis::pipe();
        pipe.atomic().cmd("ZADD").arg(key);
        for member in members {
            pipe.arg(score_ms).arg(member);
        }
        pipe.ignore();
        pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl)).ignore();

        let (): () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn take_from_bucket(&self, key: &str, params: BucketParams) -> Result<BucketOutcome, AdmissionError> {
        let mut conn = self.connection().await?;
        let (allowed, remaining): (i64, i64) = self
            .token_bucket_script
            .key(key)
            .arg(params.capacity)
            .arg(params.refill_per_sec)
            .arg(params.requested)
            .arg(params.now_ms)
            .arg(millis(params.ttl))
            .invoke_async(&mut conn)
            .await?;

        Ok(BucketOutcome {
            allowed: allowed == 1,
            remaining: u64::try_from(remaining).unwrap_or(0),
        })
    }

    #[instrument(skip_all, fields(keys = keys.len()))]
    async fn delete(&self, keys: &[String]) -> Result<(), AdmissionError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection().await?;
        let removed: i64 = ::redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;

        debug!(target: "admission.store", removed = removed, "Deleted rate limit keys");
        Ok(())
    }
}
