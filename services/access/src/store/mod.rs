//! Durable stores behind the access-control core
//!
//! The core only talks to these traits. Each implementation must provide the
//! atomicity documented on the method; the managers never fall back to a
//! check-then-write sequence of their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{Ban, NewSession, RequestLogEntry, Session, SessionRotation, WindowCount};

pub mod memory;
pub mod postgres;
pub mod redis;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use redis::RedisRequestLog;

/// Sessions table
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Revoke the live session of `(user_id, device_id)`, if any, and insert
    /// `session` as the new live one, atomically
    ///
    /// Concurrent calls for the same pair serialize: exactly one session of
    /// the pair is left unrevoked. Returns the id of the session replaced.
    async fn replace_active(&self, session: NewSession) -> StoreResult<(Session, Option<Uuid>)>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Session>>;

    /// Swap the secret hash if, and only if, the session is unrevoked,
    /// unexpired at `rotated_at`, and still holds `expected_hash`
    ///
    /// The replaced hash is kept as `previous_token_hash`.
    async fn compare_and_rotate(&self, rotation: SessionRotation) -> StoreResult<Option<Session>>;

    /// Returns false when the session was unknown or already revoked
    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Returns the number of sessions newly revoked
    async fn revoke_all_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64>;

    async fn list_active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>>;

    /// Delete sessions that expired, or were revoked, before `cutoff`
    async fn purge(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Ban registry, one row per user
#[async_trait]
pub trait BanRegistry: Send + Sync {
    /// Upsert the user's row as banned
    ///
    /// `ban_date` is set to `at` only when the user was not already banned.
    async fn ban(&self, user_id: Uuid, reason: &str, at: DateTime<Utc>) -> StoreResult<Ban>;

    /// Clear the flag, keeping reason and date. `None` if the user never had a row.
    async fn unban(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<Option<Ban>>;

    async fn find(&self, user_id: Uuid) -> StoreResult<Option<Ban>>;

    async fn list_banned(&self) -> StoreResult<Vec<Ban>>;
}

/// Append-only request log
#[async_trait]
pub trait RequestLog: Send + Sync {
    /// Append `entry`, then count the entries of its (ip, url) pair with a
    /// timestamp at or after `window_start`, the new one included
    ///
    /// When the count exceeds `max_requests` the result also carries the
    /// quota boundary described on [`WindowCount::boundary`].
    async fn append_and_count(
        &self,
        entry: &RequestLogEntry,
        window_start: DateTime<Utc>,
        max_requests: u64,
    ) -> StoreResult<WindowCount>;

    /// Drop entries older than `cutoff`
    async fn prune(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}
