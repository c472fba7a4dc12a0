//! Shared state store client backed by a Redis-protocol server.
//!
//! The rule engine keeps its rolling counters and alert de-duplication keys
//! here so that multiple gateway replicas converge on the same decisions.
//! Only a small command surface is needed: atomic increments with TTLs,
//! `SET NX` with TTL, and ping.

use fred::prelude::*;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("invalid state store url: {0}")]
    InvalidUrl(String),

    #[error("state store unavailable: {0}")]
    Unavailable(#[from] Error),
}

/// Thin client wrapper adding key prefixing and the handful of atomic
/// operations the pipeline relies on.
#[derive(Clone)]
pub struct StateStore {
    client: Client,
    key_prefix: String,
}

impl StateStore {
    /// Creates the client without connecting. Call `connect()` before use.
    pub fn new(url: &str, key_prefix: &str) -> Result<Self, StateError> {
        let config =
            Config::from_url(url).map_err(|_| StateError::InvalidUrl(url.to_string()))?;
        let client = Client::new(config, None, None, None);
        Ok(Self {
            client,
            key_prefix: key_prefix.to_string(),
        })
    }

    /// Establish the connection and wait until it is usable.
    pub async fn connect(&self) -> Result<(), StateError> {
        self.client.connect();
        self.client.wait_for_connect().await?;
        Ok(())
    }

    /// Round-trip health probe.
    pub async fn ping(&self) -> Result<(), StateError> {
        let _: String = self.client.ping(None).await?;
        Ok(())
    }

    /// Atomically increment a counter, attaching a TTL when the key is fresh.
    ///
    /// Returns the post-increment value. The TTL is set only on the first
    /// increment so the rolling window is anchored at the first event.
    pub async fn incr_with_ttl(&self, key: &str, by: i64, ttl_secs: i64) -> Result<i64, StateError> {
        let key = self.key(key);
        let count: i64 = self.client.incr_by(&key, by).await?;

        if count == by {
            if let Err(e) = self.client.expire::<(), _>(&key, ttl_secs, None).await {
                warn!(error = %e, key = %key, "Failed to set TTL on counter");
            }
        }

        Ok(count)
    }

    /// `SET NX` with TTL. Returns true when this call created the key,
    /// false when the key already existed (someone else holds the window).
    pub async fn set_nx_with_ttl(&self, key: &str, ttl_secs: i64) -> Result<bool, StateError> {
        let key = self.key(key);
        let created: Option<String> = self
            .client
            .set(
                &key,
                "1",
                Some(Expiration::EX(ttl_secs)),
                Some(SetOptions::NX),
                false,
            )
            .await?;
        Ok(created.is_some())
    }

    /// Close the connection; errors are logged, not surfaced.
    pub async fn quit(&self) {
        if let Err(e) = self.client.quit().await {
            warn!(error = %e, "Failed to close state store connection");
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }
}
