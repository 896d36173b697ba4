//! Error types for the access-control core
//!
//! Store failures, session and ban failures, and the boundary error the HTTP
//! layer turns into responses. Expired, revoked, mismatched and replayed
//! secrets all leave this crate as the same `Unauthorized`.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use common::error::DatabaseError;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Failure talking to a durable store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or the query failed
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A concurrent writer won a uniqueness race
    #[error("Conflicting write: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Whether retrying the same write can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::Conflict(db_err.message().to_string());
            }
        }
        StoreError::Unavailable(err.to_string())
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Type alias for store results
pub type StoreResult<T> = Result<T, StoreError>;

/// Session lifecycle failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Device id must be a UUIDv4: {0}")]
    InvalidDeviceId(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Session revoked")]
    SessionRevoked,

    #[error("Refresh secret does not match")]
    SecretMismatch,

    /// A secret already replaced by a rotation was presented again
    #[error("Rotated refresh secret replayed for user {user_id}")]
    SecretReuse { user_id: Uuid },

    #[error("Session not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Failures that must reach the caller as a plain `Unauthorized`
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            SessionError::SessionExpired
                | SessionError::SessionRevoked
                | SessionError::SecretMismatch
                | SessionError::SecretReuse { .. }
                | SessionError::NotFound
        )
    }
}

/// Moderation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BanError {
    #[error("Invalid ban reason: {0}")]
    InvalidReason(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The ban row was written but revoking the user's sessions failed
    #[error("Ban recorded but session revocation failed: {0}")]
    Revocation(#[source] SessionError),
}

impl BanError {
    pub fn is_transient(&self) -> bool {
        match self {
            BanError::Store(e) => e.is_transient(),
            BanError::Revocation(SessionError::Store(e)) => e.is_transient(),
            _ => false,
        }
    }
}

/// Error returned to callers of the access-control service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("User banned: {reason}")]
    UserBanned { reason: String },

    #[error("Rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found")]
    NotFound,

    #[error("Store unavailable")]
    StoreUnavailable,
}

impl From<SessionError> for AccessError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidDeviceId(id) => AccessError::InvalidDeviceId(id),
            SessionError::Store(_) => AccessError::StoreUnavailable,
            _ => AccessError::Unauthorized,
        }
    }
}

impl From<BanError> for AccessError {
    fn from(err: BanError) -> Self {
        match err {
            BanError::InvalidReason(msg) => AccessError::InvalidRequest(msg),
            BanError::Store(_) | BanError::Revocation(_) => AccessError::StoreUnavailable,
        }
    }
}

impl From<StoreError> for AccessError {
    fn from(_: StoreError) -> Self {
        AccessError::StoreUnavailable
    }
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AccessError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AccessError::UserBanned { reason } => {
                (StatusCode::FORBIDDEN, format!("User banned: {}", reason))
            }
            AccessError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests".to_string(),
            ),
            AccessError::InvalidDeviceId(_) => {
                (StatusCode::BAD_REQUEST, "Invalid device id".to_string())
            }
            AccessError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AccessError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AccessError::StoreUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        let mut response = (status, body).into_response();
        if let AccessError::RateLimited {
            retry_after_seconds,
        } = self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Type alias for results crossing the service boundary
pub type AccessResult<T> = Result<T, AccessError>;
