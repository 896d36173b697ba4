//! In-process store
//!
//! Backs tests and local development. Each table sits behind its own lock
//! and every trait method holds it for the whole operation, which gives the
//! same atomicity the PostgreSQL store gets from transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{Ban, NewSession, RequestLogEntry, Session, SessionRotation, WindowCount};
use crate::store::{BanRegistry, RequestLog, SessionStore};

/// Memory-backed implementation of every store trait
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
    bans: Mutex<HashMap<Uuid, Ban>>,
    request_log: Mutex<Vec<RequestLogEntry>>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `StoreError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every following call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of entries currently held in the request log
    pub async fn request_log_len(&self) -> usize {
        self.request_log.lock().await.len()
    }

    async fn io(&self) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn replace_active(&self, session: NewSession) -> StoreResult<(Session, Option<Uuid>)> {
        self.io().await?;
        let mut sessions = self.sessions.lock().await;

        let replaced = sessions
            .values_mut()
            .find(|s| {
                s.user_id == session.user_id && s.device_id == session.device_id && !s.revoked
            })
            .map(|s| {
                s.revoked = true;
                s.revoked_at = Some(session.issued_at);
                s.id
            });

        let session = session.into_session();
        sessions.insert(session.id, session.clone());
        Ok((session, replaced))
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<Session>> {
        self.io().await?;
        Ok(self.sessions.lock().await.get(&id).cloned())
    }

    async fn compare_and_rotate(&self, rotation: SessionRotation) -> StoreResult<Option<Session>> {
        self.io().await?;
        let mut sessions = self.sessions.lock().await;

        let Some(session) = sessions.get_mut(&rotation.session_id) else {
            return Ok(None);
        };
        if !session.is_active(rotation.rotated_at)
            || session.refresh_token_hash != rotation.expected_hash
        {
            return Ok(None);
        }

        session.previous_token_hash = Some(std::mem::replace(
            &mut session.refresh_token_hash,
            rotation.new_hash,
        ));
        session.last_rotated_at = rotation.rotated_at;
        session.expires_at = rotation.expires_at;
        Ok(Some(session.clone()))
    }

    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        self.io().await?;
        let mut sessions = self.sessions.lock().await;

        match sessions.get_mut(&id) {
            Some(session) if !session.revoked => {
                session.revoked = true;
                session.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64> {
        self.io().await?;
        let mut sessions = self.sessions.lock().await;

        let mut revoked = 0;
        for session in sessions
            .values_mut()
            .filter(|s| s.user_id == user_id && !s.revoked)
        {
            session.revoked = true;
            session.revoked_at = Some(at);
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn list_active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Session>> {
        self.io().await?;
        let sessions = self.sessions.lock().await;

        let mut active: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active(now))
            .cloned()
            .collect();
        active.sort_by_key(|s| s.issued_at);
        Ok(active)
    }

    async fn purge(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.io().await?;
        let mut sessions = self.sessions.lock().await;

        let before = sessions.len();
        sessions.retain(|_, s| {
            let revoked_long_ago = s.revoked_at.is_some_and(|at| at < cutoff);
            !(s.expires_at < cutoff || revoked_long_ago)
        });
        Ok((before - sessions.len()) as u64)
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.io().await
    }
}

#[async_trait]
impl BanRegistry for MemoryStore {
    async fn ban(&self, user_id: Uuid, reason: &str, at: DateTime<Utc>) -> StoreResult<Ban> {
        self.io().await?;
        let mut bans = self.bans.lock().await;

        let ban = bans.entry(user_id).or_insert_with(|| Ban {
            user_id,
            is_banned: false,
            ban_reason: None,
            ban_date: None,
            updated_at: at,
        });
        if !ban.is_banned {
            ban.ban_date = Some(at);
        }
        ban.is_banned = true;
        ban.ban_reason = Some(reason.to_string());
        ban.updated_at = at;
        Ok(ban.clone())
    }

    async fn unban(&self, user_id: Uuid, at: DateTime<Utc>) -> StoreResult<Option<Ban>> {
        self.io().await?;
        let mut bans = self.bans.lock().await;

        Ok(bans.get_mut(&user_id).map(|ban| {
            ban.is_banned = false;
            ban.updated_at = at;
            ban.clone()
        }))
    }

    async fn find(&self, user_id: Uuid) -> StoreResult<Option<Ban>> {
        self.io().await?;
        Ok(self.bans.lock().await.get(&user_id).cloned())
    }

    async fn list_banned(&self) -> StoreResult<Vec<Ban>> {
        self.io().await?;
        let bans = self.bans.lock().await;

        let mut banned: Vec<Ban> = bans.values().filter(|b| b.is_banned).cloned().collect();
        banned.sort_by_key(|b| b.ban_date);
        Ok(banned)
    }
}

#[async_trait]
impl RequestLog for MemoryStore {
    async fn append_and_count(
        &self,
        entry: &RequestLogEntry,
        window_start: DateTime<Utc>,
        max_requests: u64,
    ) -> StoreResult<WindowCount> {
        self.io().await?;
        let mut log = self.request_log.lock().await;
        log.push(entry.clone());

        let mut in_window: Vec<DateTime<Utc>> = log
            .iter()
            .filter(|e| e.ip == entry.ip && e.url == entry.url && e.timestamp >= window_start)
            .map(|e| e.timestamp)
            .collect();
        in_window.sort_unstable();

        let count = in_window.len() as u64;
        let boundary = if count > max_requests {
            in_window.get((count - max_requests) as usize).copied()
        } else {
            None
        };

        Ok(WindowCount { count, boundary })
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.io().await?;
        let mut log = self.request_log.lock().await;

        let before = log.len();
        log.retain(|e| e.timestamp >= cutoff);
        Ok((before - log.len()) as u64)
    }
}
