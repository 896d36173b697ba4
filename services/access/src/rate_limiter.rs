//! Sliding-window rate limiter keyed by client address and route
//!
//! Every request to a protected route is appended to the request log, then the
//! entries in `[now - window, now]` are counted. The window moves with each
//! call, so there is no bucket edge to burst across.

use chrono::Duration;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{RateLimitConfig, RateLimitRule};
use crate::error::StoreError;
use crate::models::RequestLogEntry;
use crate::store::RequestLog;

/// Outcome of [`RateLimiter::record`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Throttled {
        /// Seconds until enough counted requests have left the window for
        /// one more to pass
        retry_after_seconds: u64,
    },
}

/// Rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    log: Arc<dyn RequestLog>,
    clock: Arc<dyn Clock>,
    enabled: bool,
    rules: HashMap<String, RateLimitRule>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(log: Arc<dyn RequestLog>, clock: Arc<dyn Clock>, config: &RateLimitConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|rule| (rule.route.clone(), rule.clone()))
            .collect();

        Self {
            log,
            clock,
            enabled: config.enabled,
            rules,
        }
    }

    /// Quota of `route`, if it is protected
    pub fn rule_for(&self, route: &str) -> Option<&RateLimitRule> {
        if !self.enabled {
            return None;
        }
        self.rules.get(route)
    }

    pub fn is_limited(&self, route: &str) -> bool {
        self.rule_for(route).is_some()
    }

    /// Widest configured window; log entries older than this are dead weight
    pub fn widest_window(&self) -> Duration {
        let seconds = self
            .rules
            .values()
            .map(|rule| rule.window_seconds)
            .max()
            .unwrap_or(0);
        Duration::seconds(seconds as i64)
    }

    /// Log a request from `ip` to `route` and decide whether it is over quota
    ///
    /// The entry is written even when the answer is `Throttled`, so rejected
    /// requests keep counting. Unprotected routes are not logged at all.
    pub async fn record(&self, ip: IpAddr, route: &str) -> Result<RateDecision, StoreError> {
        let Some(rule) = self.rule_for(route) else {
            return Ok(RateDecision::Allowed);
        };

        let now = self.clock.now();
        let window = Duration::seconds(rule.window_seconds as i64);
        let entry = RequestLogEntry {
            ip: ip.to_string(),
            url: route.to_string(),
            timestamp: now,
        };

        let counted = self
            .log
            .append_and_count(&entry, now - window, rule.max_requests)
            .await?;
        debug!(
            "{} request(s) from {} to {} in the last {}s",
            counted.count, ip, route, rule.window_seconds
        );

        if counted.count <= rule.max_requests {
            return Ok(RateDecision::Allowed);
        }

        // The retried request is counted as well, so it passes only once the
        // boundary entry is strictly older than the window start.
        let boundary = counted.boundary.unwrap_or(now);
        let remaining = (boundary + window - now).num_milliseconds().max(0) as u64;
        let retry_after_seconds = remaining / 1000 + 1;

        warn!(
            "Throttled {} on {}: {} requests in {}s (limit {})",
            ip, route, counted.count, rule.window_seconds, rule.max_requests
        );
        Ok(RateDecision::Throttled { retry_after_seconds })
    }

    /// Drop log entries no window can reach anymore
    pub async fn prune(&self) -> Result<u64, StoreError> {
        let cutoff = self.clock.now() - self.widest_window();
        let pruned = self.log.prune(cutoff).await?;
        if pruned > 0 {
            info!("Pruned {} request log entries", pruned);
        }
        Ok(pruned)
    }
}
