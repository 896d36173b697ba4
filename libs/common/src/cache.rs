//! Redis module for the blog platform
//!
//! Connection handling plus the sorted-set window primitive used by the
//! Redis-backed request log.

use redis::{AsyncCommands, Client};
use tracing::info;

use crate::error::DatabaseResult;

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    pub fn from_env() -> DatabaseResult<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        Ok(RedisConfig { url })
    }
}

/// Result of appending a member to a sliding window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSnapshot {
    /// Members whose score falls inside the window, the new one included
    pub count: u64,
    /// Score of the member ranked `keep` places from the newest end, if any
    pub boundary_score: Option<f64>,
}

/// Redis connection handle
///
/// Cloning is cheap; every clone shares the same client.
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
}

impl RedisPool {
    /// Initialize a new Redis client
    pub async fn new(config: &RedisConfig) -> DatabaseResult<Self> {
        let client = Client::open(config.url.clone())?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool { client })
    }

    async fn get_connection(&self) -> DatabaseResult<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Add `member` at `score` to the sorted set `key` and count the window
    ///
    /// Runs as one `MULTI`/`EXEC` block: the insert, the trim of members older
    /// than `window_start`, the count and the boundary lookup observe the
    /// same state. After the trim only window members remain, so rank `-keep`
    /// is ascending position `count - keep`. The key expires after
    /// `ttl_seconds` of inactivity.
    pub async fn append_to_window(
        &self,
        key: &str,
        member: &str,
        score: f64,
        window_start: f64,
        ttl_seconds: i64,
        keep: u64,
    ) -> DatabaseResult<WindowSnapshot> {
        let mut conn = self.get_connection().await?;
        let rank = -(keep.max(1) as isize);

        let (count, boundary): (u64, Vec<(String, f64)>) = redis::pipe()
            .atomic()
            .zadd(key, member, score)
            .ignore()
            .zrembyscore(key, "-inf", format!("({}", window_start))
            .ignore()
            .zcount(key, window_start, "+inf")
            .zrange_withscores(key, rank, rank)
            .expire(key, ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(WindowSnapshot {
            count,
            boundary_score: boundary.first().map(|(_, score)| *score),
        })
    }

    /// Delete a key from Redis
    pub async fn delete(&self, key: &str) -> DatabaseResult<()> {
        let mut conn = self.get_connection().await?;
        let _: u64 = conn.del(key).await?;
        Ok(())
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> DatabaseResult<bool> {
        let mut conn = self.get_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}
