//! Session & access-control core of the blog platform
//!
//! Tracks which device sessions may act for a user, cuts banned users off
//! across all their sessions, and throttles abusive request patterns per
//! client address and route. [`access::AccessController`] is the entry point
//! the rest of the backend calls once per request.

pub mod access;
pub mod ban;
pub mod clock;
pub mod config;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod rate_limiter;
pub mod retry;
pub mod routes;
pub mod secret;
pub mod session;
pub mod store;
pub mod validation;

use std::sync::Arc;

use crate::access::AccessController;
use crate::ban::BanGate;
use crate::clock::{Clock, IdGenerator};
use crate::config::AccessConfig;
use crate::rate_limiter::RateLimiter;
use crate::session::SessionManager;
use crate::store::{BanRegistry, RequestLog, SessionStore};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: AccessController,
    pub service_token: Option<String>,
}

/// The stores and time sources the core runs on
pub struct Backends {
    pub sessions: Arc<dyn SessionStore>,
    pub bans: Arc<dyn BanRegistry>,
    pub request_log: Arc<dyn RequestLog>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

/// Wire the session manager, ban gate and rate limiter into a controller
pub fn build_controller(backends: Backends, config: &AccessConfig) -> AccessController {
    let Backends {
        sessions,
        bans,
        request_log,
        clock,
        ids,
    } = backends;

    let session_manager = SessionManager::new(sessions, clock.clone(), ids, &config.session);
    let ban_gate = BanGate::new(bans, session_manager.clone(), clock.clone());
    let limiter = RateLimiter::new(request_log, clock.clone(), &config.rate_limit);

    AccessController::new(session_manager, ban_gate, limiter, clock, config)
}
