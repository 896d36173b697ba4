//! Redis request log
//!
//! One sorted set per (ip, route), scored by request time in milliseconds.
//! Members older than the window are trimmed on every append and idle keys
//! expire on their own, so [`RequestLog::prune`] has nothing to do.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use common::cache::RedisPool;
use uuid::Uuid;

use crate::clock::{IdGenerator, UuidGenerator};
use crate::error::StoreResult;
use crate::models::{RequestLogEntry, WindowCount};
use crate::store::RequestLog;

/// Request log kept in Redis sorted sets
#[derive(Clone)]
pub struct RedisRequestLog {
    redis_pool: RedisPool,
    /// Key TTL; must cover the widest configured window
    ttl_seconds: i64,
}

impl RedisRequestLog {
    pub fn new(redis_pool: RedisPool, ttl_seconds: u64) -> Self {
        Self {
            redis_pool,
            ttl_seconds: ttl_seconds.max(1) as i64,
        }
    }

    fn key(ip: &str, url: &str) -> String {
        format!("request_log:{}:{}", ip, url)
    }

    fn member(timestamp: DateTime<Utc>, id: Uuid) -> String {
        format!("{}:{}", timestamp.timestamp_millis(), id)
    }
}

#[async_trait]
impl RequestLog for RedisRequestLog {
    async fn append_and_count(
        &self,
        entry: &RequestLogEntry,
        window_start: DateTime<Utc>,
        max_requests: u64,
    ) -> StoreResult<WindowCount> {
        let key = Self::key(&entry.ip, &entry.url);
        let member = Self::member(entry.timestamp, UuidGenerator.next_id());

        let snapshot = self
            .redis_pool
            .append_to_window(
                &key,
                &member,
                entry.timestamp.timestamp_millis() as f64,
                window_start.timestamp_millis() as f64,
                self.ttl_seconds,
                max_requests,
            )
            .await?;

        let boundary = snapshot
            .boundary_score
            .filter(|_| snapshot.count > max_requests)
            .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single());

        Ok(WindowCount {
            count: snapshot.count,
            boundary,
        })
    }

    async fn prune(&self, _cutoff: DateTime<Utc>) -> StoreResult<u64> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::cache::RedisConfig;

    #[test]
    fn test_keys_are_scoped_by_ip_and_route() {
        assert_eq!(
            RedisRequestLog::key("1.2.3.4", "login"),
            "request_log:1.2.3.4:login"
        );
        assert_ne!(
            RedisRequestLog::key("1.2.3.4", "login"),
            RedisRequestLog::key("1.2.3.4", "comment")
        );
    }

    #[tokio::test]
    #[ignore = "requires a running Redis"]
    async fn test_window_count_against_redis() {
        let pool = RedisPool::new(&RedisConfig::from_env().unwrap()).await.unwrap();
        let log = RedisRequestLog::new(pool.clone(), 60);
        let now = Utc::now();
        let ip = format!("test-{}", Uuid::new_v4());
        pool.delete(&RedisRequestLog::key(&ip, "login")).await.unwrap();

        let mut last = None;
        for offset in [30, 20, 10] {
            let entry = RequestLogEntry {
                ip: ip.clone(),
                url: "login".to_string(),
                timestamp: now - Duration::seconds(offset),
            };
            last = Some(
                log.append_and_count(&entry, now - Duration::seconds(25), 1)
                    .await
                    .unwrap(),
            );
        }

        let last = last.unwrap();
        assert_eq!(last.count, 2);
        assert_eq!(
            last.boundary.map(|t| t.timestamp_millis()),
            Some((now - Duration::seconds(10)).timestamp_millis())
        );
    }
}
