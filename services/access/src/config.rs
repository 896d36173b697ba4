//! Access-control policy configuration
//!
//! Loaded with the `config` crate from an optional TOML file overlaid by
//! `ACCESS_*` environment variables. Nested keys use `__`, for example
//! `ACCESS_SESSION__TTL_SECONDS=86400`.

use anyhow::{Result, bail};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashSet;

use crate::validation::validate_route;

/// Default location of the policy file, extension optional
pub const DEFAULT_CONFIG_FILE: &str = "config/access";

/// Top-level configuration of the access service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Address the internal API binds to
    pub listen_addr: String,
    /// Bearer token other services must present; unset disables the check
    pub service_token: Option<String>,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub timeouts: TimeoutConfig,
    pub retry: RetryConfig,
    pub retention: RetentionConfig,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            service_token: None,
            session: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

impl AccessConfig {
    /// Load from `ACCESS_CONFIG_FILE` (or the default path) and the environment
    pub fn from_env() -> Result<Self> {
        let path =
            std::env::var("ACCESS_CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load(&path)
    }

    /// Load from the given file (missing is fine) and the environment
    pub fn load(path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("ACCESS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AccessConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the core cannot enforce
    pub fn validate(&self) -> Result<()> {
        if self.session.ttl_seconds == 0 {
            bail!("session.ttl_seconds must be positive");
        }

        let mut seen = HashSet::new();
        for rule in &self.rate_limit.rules {
            if let Err(msg) = validate_route(&rule.route) {
                bail!("rate_limit rule: {}", msg);
            }
            if rule.window_seconds == 0 {
                bail!("rate_limit rule '{}': window_seconds must be positive", rule.route);
            }
            if rule.max_requests == 0 {
                bail!("rate_limit rule '{}': max_requests must be positive", rule.route);
            }
            if !seen.insert(rule.route.as_str()) {
                bail!("rate_limit rule '{}' is defined twice", rule.route);
            }
        }

        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }

        Ok(())
    }
}

/// Session lifetime and rotation policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime granted by every issue and rotation
    pub ttl_seconds: u64,
    /// Authorized verdicts ask for a rotation once expiry is this close
    pub rotation_window_seconds: u64,
    /// Revoke every session of a user when a rotated secret is replayed
    pub revoke_all_on_reuse: bool,
    /// Expired or revoked rows are deleted this long after they stop being valid
    pub purge_grace_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 30 * 24 * 3600,           // 30 days
            rotation_window_seconds: 24 * 3600,    // 1 day
            revoke_all_on_reuse: true,
            purge_grace_seconds: 7 * 24 * 3600,    // 7 days
        }
    }
}

/// Where the request log lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestLogBackend {
    #[default]
    Postgres,
    Redis,
}

/// Quota of one protected route
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimitRule {
    pub route: String,
    pub window_seconds: u64,
    pub max_requests: u64,
}

impl RateLimitRule {
    pub fn new(route: &str, window_seconds: u64, max_requests: u64) -> Self {
        Self {
            route: route.to_string(),
            window_seconds,
            max_requests,
        }
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub backend: RequestLogBackend,
    /// Routes not listed here are unlimited
    pub rules: Vec<RateLimitRule>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: RequestLogBackend::Postgres,
            rules: vec![
                RateLimitRule::new("login", 300, 10),
                RateLimitRule::new("registration", 60, 5),
                RateLimitRule::new("comment", 60, 10),
            ],
        }
    }
}

/// Per-check store timeouts, in milliseconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Exceeding it lets the request through
    pub rate_limit_ms: u64,
    /// Exceeding it rejects the request
    pub session_ms: u64,
    /// Exceeding it rejects the request
    pub ban_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: 250,
            session_ms: 500,
            ban_ms: 500,
        }
    }
}

/// Bounded exponential backoff for writes
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
        }
    }
}

/// Cleanup job schedule
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Six-field cron expression
    pub schedule: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            schedule: "0 */10 * * * *".to_string(),
        }
    }
}
