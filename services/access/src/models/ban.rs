//! Ban model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Ban status of a user
///
/// One row per user, upserted on every moderation action and never deleted.
/// `ban_reason` and `ban_date` survive an unban for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Ban {
    pub user_id: Uuid,
    pub is_banned: bool,
    pub ban_reason: Option<String>,
    pub ban_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Ban {
    /// Reason to show the user when the ban is in force
    pub fn active_reason(&self) -> Option<&str> {
        if self.is_banned {
            self.ban_reason.as_deref()
        } else {
            None
        }
    }
}
