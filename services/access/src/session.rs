//! Session management
//!
//! Issues, rotates and revokes device sessions. Every session is backed by a
//! refresh secret that changes on each rotation; only its hash is stored.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{Clock, IdGenerator};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::models::{NewSession, Session, SessionRotation};
use crate::secret::{generate_secret, hash_secret, session_token};
use crate::store::SessionStore;
use crate::validation::validate_device_id;

/// Returned once by [`SessionManager::issue`]
#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub session_id: Uuid,
    pub refresh_secret: String,
    /// `<session_id>.<refresh_secret>`, presented on every request
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Returned once by [`SessionManager::rotate`]
///
/// The previous session token stops working.
#[derive(Debug, Clone, Serialize)]
pub struct RotatedSession {
    pub session_id: Uuid,
    pub refresh_secret: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Session manager for handling user device sessions
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    ttl: Duration,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            store,
            clock,
            ids,
            ttl: Duration::seconds(config.ttl_seconds as i64),
        }
    }

    /// Start a session for `user_id` on `device_id`
    ///
    /// Any live session of the same device is revoked in the same store
    /// operation. The raw secret is only ever returned here.
    pub async fn issue(
        &self,
        user_id: Uuid,
        device_id: &str,
        ip: &str,
    ) -> Result<IssuedSession, SessionError> {
        let device_id = validate_device_id(device_id).map_err(SessionError::InvalidDeviceId)?;

        let now = self.clock.now();
        let (refresh_secret, refresh_token_hash) = generate_secret();
        let new_session = NewSession {
            id: self.ids.next_id(),
            user_id,
            device_id,
            refresh_token_hash,
            ip: ip.to_string(),
            issued_at: now,
            expires_at: now + self.ttl,
        };

        let (session, replaced) = self.store.replace_active(new_session).await?;
        match replaced {
            Some(old) => info!(
                "Issued session {} for user {} on device {}, replacing {}",
                session.id, user_id, device_id, old
            ),
            None => info!(
                "Issued session {} for user {} on device {}",
                session.id, user_id, device_id
            ),
        }

        Ok(IssuedSession {
            session_id: session.id,
            session_token: session_token(session.id, &refresh_secret),
            refresh_secret,
            expires_at: session.expires_at,
        })
    }

    /// Exchange the current refresh secret for a new one
    ///
    /// The session keeps its id. A secret that was valid before the last
    /// rotation yields [`SessionError::SecretReuse`] so the caller can decide
    /// how hard to react.
    pub async fn rotate(
        &self,
        session_id: Uuid,
        presented_secret: &str,
    ) -> Result<RotatedSession, SessionError> {
        let now = self.clock.now();
        let presented_hash = hash_secret(presented_secret);
        let (refresh_secret, new_hash) = generate_secret();

        let rotation = SessionRotation {
            session_id,
            expected_hash: presented_hash.clone(),
            new_hash,
            rotated_at: now,
            expires_at: now + self.ttl,
        };

        if let Some(session) = self.store.compare_and_rotate(rotation).await? {
            info!("Rotated session {} for user {}", session.id, session.user_id);
            return Ok(RotatedSession {
                session_id: session.id,
                session_token: session_token(session.id, &refresh_secret),
                refresh_secret,
                expires_at: session.expires_at,
            });
        }

        let session = self
            .store
            .find_by_id(session_id)
            .await?
            .ok_or(SessionError::NotFound)?;

        let err = if session.revoked {
            SessionError::SessionRevoked
        } else if now >= session.expires_at {
            SessionError::SessionExpired
        } else if session.previous_token_hash.as_deref() == Some(presented_hash.as_str()) {
            SessionError::SecretReuse {
                user_id: session.user_id,
            }
        } else {
            SessionError::SecretMismatch
        };

        warn!("Rejected rotation of session {}: {}", session_id, err);
        Err(err)
    }

    /// Revoke one session; revoking twice is not an error
    pub async fn revoke(&self, session_id: Uuid) -> Result<(), SessionError> {
        if self.store.revoke(session_id, self.clock.now()).await? {
            info!("Revoked session {}", session_id);
        }
        Ok(())
    }

    /// Revoke every live session of a user, returning how many were live
    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, SessionError> {
        let revoked = self
            .store
            .revoke_all_for_user(user_id, self.clock.now())
            .await?;
        info!("Revoked {} session(s) for user {}", revoked, user_id);
        Ok(revoked)
    }

    /// Load a session and check it can still act
    ///
    /// Expiry is detected here, lazily; nothing sweeps sessions in the
    /// background to mark them expired.
    pub async fn validate(&self, session_id: Uuid) -> Result<Session, SessionError> {
        let session = self
            .store
            .find_by_id(session_id)
            .await?
            .ok_or(SessionError::NotFound)?;

        if session.revoked {
            return Err(SessionError::SessionRevoked);
        }
        if self.clock.now() >= session.expires_at {
            return Err(SessionError::SessionExpired);
        }
        Ok(session)
    }

    /// Check a presented session token's secret against the live session
    ///
    /// Read-only. A secret replaced by a rotation yields
    /// [`SessionError::SecretReuse`], any other wrong secret
    /// [`SessionError::SecretMismatch`].
    pub async fn verify(
        &self,
        session_id: Uuid,
        presented_secret: &str,
    ) -> Result<Session, SessionError> {
        let session = self.validate(session_id).await?;
        let presented_hash = hash_secret(presented_secret);

        if session.refresh_token_hash == presented_hash {
            return Ok(session);
        }
        if session.previous_token_hash.as_deref() == Some(presented_hash.as_str()) {
            return Err(SessionError::SecretReuse {
                user_id: session.user_id,
            });
        }
        Err(SessionError::SecretMismatch)
    }

    /// `revoked == false && now < expires_at`
    pub async fn is_valid(&self, session_id: Uuid) -> Result<bool, SessionError> {
        match self.validate(session_id).await {
            Ok(_) => Ok(true),
            Err(SessionError::Store(e)) => Err(SessionError::Store(e)),
            Err(_) => Ok(false),
        }
    }

    /// Live sessions of a user, oldest first
    pub async fn list_active(&self, user_id: Uuid) -> Result<Vec<Session>, SessionError> {
        Ok(self
            .store
            .list_active_for_user(user_id, self.clock.now())
            .await?)
    }

    /// Delete rows that stopped being valid more than `grace` ago
    pub async fn purge_stale(&self, grace: Duration) -> Result<u64, SessionError> {
        let purged = self.store.purge(self.clock.now() - grace).await?;
        if purged > 0 {
            info!("Purged {} stale session(s)", purged);
        }
        Ok(purged)
    }

    pub async fn health_check(&self) -> Result<(), SessionError> {
        Ok(self.store.health_check().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, UuidGenerator};
    use crate::store::MemoryStore;

    fn manager() -> (SessionManager, Arc<ManualClock>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let config = SessionConfig {
            ttl_seconds: 3600,
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(
            store.clone(),
            clock.clone(),
            Arc::new(UuidGenerator),
            &config,
        );
        (manager, clock, store)
    }

    fn device() -> String {
        Uuid::new_v4().to_string()
    }

    #[tokio::test]
    async fn test_issue_rejects_malformed_device_id() {
        let (manager, _, store) = manager();
        let user = Uuid::new_v4();

        let err = manager.issue(user, "laptop", "1.2.3.4").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidDeviceId(_)));
        assert!(manager.list_active(user).await.unwrap().is_empty());
        assert!(store.find_by_id(Uuid::nil()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_issue_for_same_device_revokes_previous() {
        let (manager, _, _) = manager();
        let (user, device) = (Uuid::new_v4(), device());

        let first = manager.issue(user, &device, "1.2.3.4").await.unwrap();
        let second = manager.issue(user, &device, "1.2.3.4").await.unwrap();

        assert!(!manager.is_valid(first.session_id).await.unwrap());
        assert!(manager.is_valid(second.session_id).await.unwrap());
        assert_ne!(first.refresh_secret, second.refresh_secret);
    }

    #[tokio::test]
    async fn test_sessions_on_other_devices_are_kept() {
        let (manager, _, _) = manager();
        let user = Uuid::new_v4();

        let phone = manager.issue(user, &device(), "1.2.3.4").await.unwrap();
        let laptop = manager.issue(user, &device(), "1.2.3.4").await.unwrap();

        assert!(manager.is_valid(phone.session_id).await.unwrap());
        assert!(manager.is_valid(laptop.session_id).await.unwrap());
        assert_eq!(manager.list_active(user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_raw_secret_is_never_stored() {
        let (manager, _, store) = manager();
        let issued = manager
            .issue(Uuid::new_v4(), &device(), "1.2.3.4")
            .await
            .unwrap();

        let stored = store.find_by_id(issued.session_id).await.unwrap().unwrap();
        assert_ne!(stored.refresh_token_hash, issued.refresh_secret);
        assert_eq!(stored.refresh_token_hash, hash_secret(&issued.refresh_secret));
    }

    #[tokio::test]
    async fn test_rotate_keeps_id_and_rejects_old_secret() {
        let (manager, clock, _) = manager();
        let issued = manager
            .issue(Uuid::new_v4(), &device(), "1.2.3.4")
            .await
            .unwrap();

        clock.advance(Duration::minutes(10));
        let rotated = manager
            .rotate(issued.session_id, &issued.refresh_secret)
            .await
            .unwrap();

        assert_eq!(rotated.session_id, issued.session_id);
        assert!(rotated.expires_at > issued.expires_at);

        let replay = manager
            .rotate(issued.session_id, &issued.refresh_secret)
            .await
            .unwrap_err();
        assert!(matches!(replay, SessionError::SecretReuse { .. }));

        manager
            .rotate(issued.session_id, &rotated.refresh_secret)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_requires_current_secret() {
        let (manager, _, _) = manager();
        let user = Uuid::new_v4();
        let issued = manager.issue(user, &device(), "1.2.3.4").await.unwrap();

        let session = manager
            .verify(issued.session_id, &issued.refresh_secret)
            .await
            .unwrap();
        assert_eq!(session.user_id, user);

        let err = manager.verify(issued.session_id, "guessed").await.unwrap_err();
        assert_eq!(err, SessionError::SecretMismatch);

        let rotated = manager
            .rotate(issued.session_id, &issued.refresh_secret)
            .await
            .unwrap();
        let err = manager
            .verify(issued.session_id, &issued.refresh_secret)
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::SecretReuse { user_id: user });
        manager
            .verify(issued.session_id, &rotated.refresh_secret)
            .await
            .unwrap();

        // verification never changes the session
        assert!(manager.is_valid(issued.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_issued_token_carries_id_and_secret() {
        let (manager, _, _) = manager();
        let issued = manager
            .issue(Uuid::new_v4(), &device(), "1.2.3.4")
            .await
            .unwrap();

        assert_eq!(
            issued.session_token,
            format!("{}.{}", issued.session_id, issued.refresh_secret)
        );
    }

    #[tokio::test]
    async fn test_rotate_with_unknown_secret_is_a_mismatch() {
        let (manager, _, _) = manager();
        let issued = manager
            .issue(Uuid::new_v4(), &device(), "1.2.3.4")
            .await
            .unwrap();

        let err = manager
            .rotate(issued.session_id, "definitely-not-the-secret")
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::SecretMismatch);
        assert!(manager.is_valid(issued.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_rotate_after_expiry_fails() {
        let (manager, clock, _) = manager();
        let issued = manager
            .issue(Uuid::new_v4(), &device(), "1.2.3.4")
            .await
            .unwrap();

        clock.advance(Duration::seconds(3600));
        let err = manager
            .rotate(issued.session_id, &issued.refresh_secret)
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::SessionExpired);
        assert!(!manager.is_valid(issued.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_rotate_revoked_session_fails() {
        let (manager, _, _) = manager();
        let issued = manager
            .issue(Uuid::new_v4(), &device(), "1.2.3.4")
            .await
            .unwrap();

        manager.revoke(issued.session_id).await.unwrap();
        let err = manager
            .rotate(issued.session_id, &issued.refresh_secret)
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::SessionRevoked);
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (manager, _, _) = manager();
        let issued = manager
            .issue(Uuid::new_v4(), &device(), "1.2.3.4")
            .await
            .unwrap();

        manager.revoke(issued.session_id).await.unwrap();
        manager.revoke(issued.session_id).await.unwrap();
        manager.revoke(Uuid::new_v4()).await.unwrap();
        assert!(!manager.is_valid(issued.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_all_for_user_counts_only_live_sessions() {
        let (manager, _, _) = manager();
        let user = Uuid::new_v4();
        let a = manager.issue(user, &device(), "1.2.3.4").await.unwrap();
        manager.issue(user, &device(), "1.2.3.4").await.unwrap();
        manager.revoke(a.session_id).await.unwrap();

        assert_eq!(manager.revoke_all_for_user(user).await.unwrap(), 1);
        assert_eq!(manager.revoke_all_for_user(user).await.unwrap(), 0);
        assert!(manager.list_active(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_is_not_reported_as_invalid() {
        let (manager, _, store) = manager();
        store.set_unavailable(true);

        let err = manager.is_valid(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SessionError::Store(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_issue_leaves_one_live_session() {
        let (manager, _, _) = manager();
        let (user, device) = (Uuid::new_v4(), device());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                let device = device.clone();
                tokio::spawn(async move { manager.issue(user, &device, "1.2.3.4").await })
            })
            .collect();

        let mut issued = Vec::new();
        for handle in handles {
            issued.push(handle.await.unwrap().unwrap());
        }

        let active = manager.list_active(user).await.unwrap();
        assert_eq!(active.len(), 1);
        let live: Vec<_> = issued
            .iter()
            .filter(|s| s.session_id == active[0].id)
            .collect();
        assert_eq!(live.len(), 1);
    }
}
