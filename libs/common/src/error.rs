//! Custom error types for the common library
//!
//! Infrastructure failures surfaced by the PostgreSQL and Redis helpers.
//! Services map these into their own domain errors.

use redis::RedisError;
use sqlx::Error as SqlxError;
use thiserror::Error;

/// Error type for the shared storage helpers
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred while opening a connection or acquiring one from the pool
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Error occurred during database migration
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),

    /// Redis command or connection failure
    #[error("Cache error: {0}")]
    Cache(#[from] RedisError),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;
