//! PostgreSQL store
//!
//! Implements the three store traits over one pool. Schema lives in
//! `migrations/` and is applied by [`PgStore::migrate`].

use async_trait::async_trait;
use common::error::DatabaseError;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{Ban, NewSession, RequestLogEntry, Session, SessionRotation, WindowCount};
use crate::store::{BanRegistry, RequestLog, SessionStore};

const SESSION_COLUMNS: &str = "id, user_id, device_id, refresh_token_hash, previous_token_hash, \
     ip, issued_at, last_rotated_at, expires_at, revoked, revoked_at";

const BAN_COLUMNS: &str = "user_id, is_banned, ban_reason, ban_date, updated_at";

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        info!("Running access-control migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn replace_active(&self, session: NewSession) -> StoreResult<(Session, Option<Uuid>)> {
        let mut tx = self.pool.begin().await?;

        // Serializes issuers of the same (user, device) slot until commit.
        // The partial unique index still rejects a second live row should
        // another writer bypass the lock.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("session:{}:{}", session.user_id, session.device_id))
            .execute(&mut *tx)
            .await?;

        let replaced: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE sessions
            SET revoked = TRUE, revoked_at = $3
            WHERE user_id = $1 AND device_id = $2 AND NOT revoked
            RETURNING id
            "#,
        )
        .bind(session.user_id)
        .bind(session.device_id)
        .bind(session.issued_at)
        .fetch_optional(&mut *tx)
        .await?;

        let inserted = sqlx::query_as::<_, Session>(&format!(
            r#"
            INSERT INTO sessions
                (id, user_id, device_id, refresh_token_hash, ip,
                 issued_at, last_rotated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6, $7)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.device_id)
        .bind(&session.refresh_token_hash)
        .bind(&session.ip)
        .bind(session.issued_at)
        .bind(session.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("Stored session {} (replaced: {:?})", inserted.id, replaced);
        Ok((inserted, replaced))
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {} FROM sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn compare_and_rotate(&self, rotation: SessionRotation) -> StoreResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(&format!(
            r#"
            UPDATE sessions
            SET previous_token_hash = refresh_token_hash,
                refresh_token_hash = $3,
                last_rotated_at = $4,
                expires_at = $5
            WHERE id = $1
              AND refresh_token_hash = $2
              AND NOT revoked
              AND expires_at > $4
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(rotation.session_id)
        .bind(&rotation.expected_hash)
        .bind(&rotation.new_hash)
        .bind(rotation.rotated_at)
        .bind(rotation.expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET revoked = TRUE, revoked_at = $2 WHERE id = $1 AND NOT revoked",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET revoked = TRUE, revoked_at = $2
            WHERE user_id = $1 AND NOT revoked
            "#,
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(&format!(
            r#"
            SELECT {}
            FROM sessions
            WHERE user_id = $1 AND NOT revoked AND expires_at > $2
            ORDER BY issued_at
            "#,
            SESSION_COLUMNS
        ))
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn purge(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM sessions WHERE expires_at < $1 OR revoked_at < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> StoreResult<()> {
        common::database::health_check(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl BanRegistry for PgStore {
    async fn ban(&self, user_id: Uuid, reason: &str, at: DateTime<Utc>) -> StoreResult<Ban> {
        let ban = sqlx::query_as::<_, Ban>(&format!(
            r#"
            INSERT INTO user_bans (user_id, is_banned, ban_reason, ban_date, updated_at)
            VALUES ($1, TRUE, $2, $3, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET ban_date = CASE
                    WHEN user_bans.is_banned THEN user_bans.ban_date
                    ELSE EXCLUDED.ban_date
                END,
                is_banned = TRUE,
                ban_reason = EXCLUDED.ban_reason,
                updated_at = EXCLUDED.updated_at
            RETURNING {}
            "#,
            BAN_COLUMNS
        ))
        .bind(user_id)
        .bind(reason)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;

        Ok(ban)
    }

    async fn unban(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<Option<Ban>> {
        let ban = sqlx::query_as::<_, Ban>(&format!(
            r#"
            UPDATE user_bans
            SET is_banned = FALSE, updated_at = $2
            WHERE user_id = $1
            RETURNING {}
            "#,
            BAN_COLUMNS
        ))
        .bind(user_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ban)
    }

    async fn find(&self, user_id: Uuid) -> StoreResult<Option<Ban>> {
        let ban = sqlx::query_as::<_, Ban>(&format!(
            "SELECT {} FROM user_bans WHERE user_id = $1",
            BAN_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(ban)
    }

    async fn list_banned(&self) -> StoreResult<Vec<Ban>> {
        let bans = sqlx::query_as::<_, Ban>(&format!(
            "SELECT {} FROM user_bans WHERE is_banned ORDER BY ban_date",
            BAN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(bans)
    }
}

#[async_trait]
impl RequestLog for PgStore {
    async fn append_and_count(
        &self,
        entry: &RequestLogEntry,
        window_start: DateTime<Utc>,
        max_requests: u64,
    ) -> StoreResult<WindowCount> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO request_log (ip, url, requested_at) VALUES ($1, $2, $3)")
            .bind(&entry.ip)
            .bind(&entry.url)
            .bind(entry.timestamp)
            .execute(&mut *tx)
            .await?;

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM request_log
            WHERE ip = $1 AND url = $2 AND requested_at >= $3
            "#,
        )
        .bind(&entry.ip)
        .bind(&entry.url)
        .bind(window_start)
        .fetch_one(&mut *tx)
        .await?;
        let count = count.max(0) as u64;

        let boundary = if count > max_requests {
            sqlx::query_scalar::<_, DateTime<Utc>>(
                r#"
                SELECT requested_at
                FROM request_log
                WHERE ip = $1 AND url = $2 AND requested_at >= $3
                ORDER BY requested_at ASC
                OFFSET $4 LIMIT 1
                "#,
            )
            .bind(&entry.ip)
            .bind(&entry.url)
            .bind(window_start)
            .bind((count - max_requests) as i64)
            .fetch_optional(&mut *tx)
            .await?
        } else {
            None
        };

        tx.commit().await?;

        Ok(WindowCount { count, boundary })
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM request_log WHERE requested_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
