//! Common library for the blog platform backend
//!
//! Shared infrastructure used by the services: PostgreSQL pool setup,
//! Redis connectivity, and the error type both of them report.
//!
//! ```rust,no_run
//! use common::database::{DatabaseConfig, health_check, init_pool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DatabaseConfig::from_env()?;
//!     let pool = init_pool(&config).await?;
//!     println!("Database health check: {}", health_check(&pool).await?);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod database;
pub mod error;
