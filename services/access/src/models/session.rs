//! Session model and related functionality

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Session entity
///
/// One row per login on a device. Rotation mutates the row in place, so the
/// id is stable for the whole life of the session.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    /// SHA-256 of the current refresh secret
    #[serde(skip_serializing)]
    pub refresh_token_hash: String,
    /// Hash of the secret replaced by the last rotation, kept to spot replays
    #[serde(skip_serializing)]
    pub previous_token_hash: Option<String>,
    /// Address the session was issued to
    pub ip: String,
    pub issued_at: DateTime<Utc>,
    pub last_rotated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Whether the session can still authorize requests at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now < self.expires_at
    }
}

/// Session creation payload
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: Uuid,
    pub refresh_token_hash: String,
    pub ip: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewSession {
    pub fn into_session(self) -> Session {
        Session {
            id: self.id,
            user_id: self.user_id,
            device_id: self.device_id,
            refresh_token_hash: self.refresh_token_hash,
            previous_token_hash: None,
            ip: self.ip,
            issued_at: self.issued_at,
            last_rotated_at: self.issued_at,
            expires_at: self.expires_at,
            revoked: false,
            revoked_at: None,
        }
    }
}

/// Session rotation payload
///
/// Applied only when the stored hash still equals `expected_hash`.
#[derive(Debug, Clone)]
pub struct SessionRotation {
    pub session_id: Uuid,
    pub expected_hash: String,
    pub new_hash: String,
    pub rotated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
