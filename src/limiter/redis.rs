//! Shared-store rate-limit backend
//!
//! Sliding-window counting on Redis sorted sets. Each request lands as a
//! uniquely-named member scored by its millisecond timestamp; the window is
//! the set cardinality after pruning everything older than `now - window_ms`.
//!
//! The prune/add/count sequence is not a transaction. Concurrent requests
//! for one identifier can interleave and overcount by at most the number of
//! in-flight calls - a bounded inaccuracy, never an undercount that would
//! disable the limit.
//!
//! Every operation runs under a timeout; a timeout is indistinguishable from
//! a store failure and makes the limiter degrade to its local store.

use super::{rate_limit_key, RateLimitBackend, RateLimitDecision};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

/// Extra TTL on top of the window so idle keys self-expire a little after
/// their last in-window entry
const TTL_BUFFER_SECS: i64 = 5;

/// TTL for probe keys, so an interrupted probe cannot leak a permanent key
const PROBE_KEY_TTL_SECS: u64 = 10;

/// Redis-backed sliding-window store
pub struct RedisBackend {
    /// Multiplexed connection for async operations
    connection: MultiplexedConnection,
    /// Per-operation timeout; timeouts count as failures
    op_timeout: Duration,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Connect to the shared store.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(redis_url: &str, op_timeout: Duration) -> Result<Self> {
        let client = Client::open(redis_url).context("Failed to create Redis client")?;

        let connection = tokio::time::timeout(op_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| anyhow!("timed out connecting to Redis"))?
            .context("Failed to connect to Redis")?;

        Ok(Self {
            connection,
            op_timeout,
        })
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "shared store operation timed out after {:?}",
                self.op_timeout
            )),
        }
    }

    async fn sliding_check(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
    ) -> Result<RateLimitDecision> {
        let now = Utc::now().timestamp_millis();
        let window_start = now - window_ms;
        let key = rate_limit_key(identifier);
        // Unique member so concurrent requests in the same millisecond never
        // collide
        let member = format!("{}-{}", now, Uuid::new_v4());

        let mut conn = self.connection.clone();

        // Exclusive bound: entries scored exactly at the window edge survive
        let _: () = conn
            .zrembyscore(&key, "-inf", format!("({window_start}"))
            .await
            .context("Failed to prune expired entries")?;

        let _: () = conn
            .zadd(&key, &member, now)
            .await
            .context("Failed to record request")?;

        let count: u32 = conn
            .zcard(&key)
            .await
            .context("Failed to read window count")?;

        let ttl_secs = (window_ms + 999) / 1000 + TTL_BUFFER_SECS;
        let _: () = conn
            .expire(&key, ttl_secs)
            .await
            .context("Failed to refresh key TTL")?;

        let allowed = count <= max_requests;
        if !allowed {
            // Roll the member back after the count read so a rejected call
            // occupies the current instant but no future window capacity
            let _: () = conn
                .zrem(&key, &member)
                .await
                .context("Failed to roll back rejected request")?;
        }

        Ok(RateLimitDecision {
            allowed,
            remaining: max_requests.saturating_sub(count),
            reset_time: now + window_ms,
        })
    }

    async fn sliding_status(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
    ) -> Result<RateLimitDecision> {
        let now = Utc::now().timestamp_millis();
        let window_start = now - window_ms;
        let key = rate_limit_key(identifier);

        let mut conn = self.connection.clone();

        // Read-only: count in-window members client-side instead of pruning
        let entries: Vec<(String, i64)> = conn
            .zrange_withscores(&key, 0, -1)
            .await
            .context("Failed to read window entries")?;

        let count = entries
            .iter()
            .filter(|(_, score)| *score >= window_start)
            .count() as u32;

        Ok(RateLimitDecision {
            allowed: count < max_requests,
            remaining: max_requests.saturating_sub(count),
            reset_time: now + window_ms,
        })
    }

    async fn delete_key(&self, identifier: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(rate_limit_key(identifier))
            .await
            .context("Failed to clear rate limit key")?;
        Ok(())
    }
}

#[async_trait]
impl RateLimitBackend for RedisBackend {
    async fn check(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
    ) -> Result<RateLimitDecision> {
        self.with_timeout(self.sliding_check(identifier, max_requests, window_ms))
            .await
    }

    async fn status(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
    ) -> Result<RateLimitDecision> {
        self.with_timeout(self.sliding_status(identifier, max_requests, window_ms))
            .await
    }

    async fn reset(&self, identifier: &str) -> Result<()> {
        self.with_timeout(self.delete_key(identifier)).await
    }

    /// Health probe: a trivial set-then-delete round trip.
    async fn probe(&self) -> Result<()> {
        self.with_timeout(async {
            let mut conn = self.connection.clone();
            let probe_key = format!("rate_limit:probe:{}", Uuid::new_v4());

            let _: () = conn
                .set_ex(&probe_key, "1", PROBE_KEY_TTL_SECS)
                .await
                .context("Probe set failed")?;
            let _: () = conn.del(&probe_key).await.context("Probe delete failed")?;

            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to get Redis URL from environment or use default
    fn get_redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    async fn backend() -> RedisBackend {
        RedisBackend::connect(&get_redis_url(), Duration::from_secs(2))
            .await
            .unwrap()
    }

    /// Tests are marked with #[ignore] because they require a running Redis
    /// server. Run with: cargo test -- --ignored

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_sliding_window_allows_then_denies() {
        let backend = backend().await;
        let id = format!("test:{}", Uuid::new_v4());

        for expected_remaining in [2, 1, 0] {
            let decision = backend.check(&id, 3, 10_000).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = backend.check(&id, 3, 10_000).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);

        backend.reset(&id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_rejected_calls_do_not_occupy_capacity() {
        let backend = backend().await;
        let id = format!("test:{}", Uuid::new_v4());

        for _ in 0..2 {
            backend.check(&id, 2, 500).await.unwrap();
        }
        // Rejected attempts are rolled back...
        for _ in 0..5 {
            assert!(!backend.check(&id, 2, 500).await.unwrap().allowed);
        }

        // ...so once the window slides past the two allowed calls, capacity
        // returns in full
        tokio::time::sleep(Duration::from_millis(600)).await;
        let decision = backend.check(&id, 2, 500).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);

        backend.reset(&id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_status_does_not_consume() {
        let backend = backend().await;
        let id = format!("test:{}", Uuid::new_v4());

        backend.check(&id, 3, 10_000).await.unwrap();

        for _ in 0..5 {
            let status = backend.status(&id, 3, 10_000).await.unwrap();
            assert!(status.allowed);
            assert_eq!(status.remaining, 2);
        }

        backend.reset(&id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_reset_clears_window() {
        let backend = backend().await;
        let id = format!("test:{}", Uuid::new_v4());

        backend.check(&id, 1, 10_000).await.unwrap();
        assert!(!backend.check(&id, 1, 10_000).await.unwrap().allowed);

        backend.reset(&id).await.unwrap();
        assert!(backend.check(&id, 1, 10_000).await.unwrap().allowed);

        backend.reset(&id).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_probe_round_trip() {
        assert!(backend().await.probe().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_unreachable_host_fails() {
        let result = RedisBackend::connect(
            "redis://127.0.0.1:1/",
            Duration::from_millis(200),
        )
        .await;
        assert!(result.is_err());
    }
}
