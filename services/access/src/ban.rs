//! Ban gate
//!
//! Answers whether a user is banned, straight from the registry on every call.
//! Banning a user also revokes all of their sessions.

use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::BanError;
use crate::models::Ban;
use crate::session::SessionManager;
use crate::store::BanRegistry;
use crate::validation::validate_ban_reason;

#[derive(Clone)]
pub struct BanGate {
    registry: Arc<dyn BanRegistry>,
    sessions: SessionManager,
    clock: Arc<dyn Clock>,
}

impl BanGate {
    pub fn new(
        registry: Arc<dyn BanRegistry>,
        sessions: SessionManager,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            sessions,
            clock,
        }
    }

    /// Ban a user and revoke every session they hold
    ///
    /// The ban row is written first, so a failure half way leaves the user
    /// banned with sessions the gate already refuses. Both steps are
    /// idempotent; callers retry the whole operation on transient errors.
    pub async fn set_ban(&self, user_id: Uuid, reason: &str) -> Result<Ban, BanError> {
        validate_ban_reason(reason).map_err(BanError::InvalidReason)?;
        let reason = reason.trim();

        let ban = self.registry.ban(user_id, reason, self.clock.now()).await?;

        let revoked = self
            .sessions
            .revoke_all_for_user(user_id)
            .await
            .map_err(|e| {
                error!("Failed to revoke sessions of banned user {}: {}", user_id, e);
                BanError::Revocation(e)
            })?;

        info!(
            "Banned user {} ({}), revoked {} session(s)",
            user_id, reason, revoked
        );
        Ok(ban)
    }

    /// Lift a ban, keeping reason and date for audit
    ///
    /// Returns `None` when the user was never banned.
    pub async fn clear_ban(&self, user_id: Uuid) -> Result<Option<Ban>, BanError> {
        let ban = self.registry.unban(user_id, self.clock.now()).await?;
        if ban.is_some() {
            info!("Cleared ban of user {}", user_id);
        }
        Ok(ban)
    }

    pub async fn is_banned(&self, user_id: Uuid) -> Result<bool, BanError> {
        Ok(self.active_ban(user_id).await?.is_some())
    }

    /// The user's row if the ban is currently in force
    pub async fn active_ban(&self, user_id: Uuid) -> Result<Option<Ban>, BanError> {
        let ban = self.registry.find(user_id).await?;
        Ok(ban.filter(|b| b.is_banned))
    }

    /// The user's row whatever its state, for audit
    pub async fn record(&self, user_id: Uuid) -> Result<Option<Ban>, BanError> {
        Ok(self.registry.find(user_id).await?)
    }

    pub async fn list_banned(&self) -> Result<Vec<Ban>, BanError> {
        Ok(self.registry.list_banned().await?)
    }
}
