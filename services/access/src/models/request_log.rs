//! Request log model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One rate-limited request, keyed by client address and route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RequestLogEntry {
    pub ip: String,
    pub url: String,
    #[sqlx(rename = "requested_at")]
    pub timestamp: DateTime<Utc>,
}

/// Entries of one (ip, route) pair inside a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    /// Set when `count > max_requests`: the timestamp of the in-window entry
    /// at ascending position `count - max_requests`. Once it leaves the window
    /// the pair has room for one more request.
    pub boundary: Option<DateTime<Utc>>,
}
