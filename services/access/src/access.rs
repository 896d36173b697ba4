//! Access controller
//!
//! The single per-request decision point. Checks run cheapest first: rate
//! limit, then session, then ban. Each check has its own store timeout.
//! A slow or failing request log lets traffic through; a slow or failing
//! session or ban store rejects it.

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ban::BanGate;
use crate::clock::Clock;
use crate::config::{AccessConfig, RetryConfig, SessionConfig, TimeoutConfig};
use crate::error::{AccessError, AccessResult, BanError, SessionError};
use crate::models::Ban;
use crate::rate_limiter::{RateDecision, RateLimiter};
use crate::retry::with_backoff;
use crate::secret::parse_session_token;
use crate::session::{IssuedSession, RotatedSession, SessionManager};

/// What the surrounding application knows about an inbound request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub ip: IpAddr,
    pub route: String,
    /// `<session_id>.<secret>` presented by the client
    pub session_token: Option<String>,
    /// User already authenticated by some other means
    pub user_id: Option<Uuid>,
}

impl AccessRequest {
    pub fn new(ip: IpAddr, route: impl Into<String>) -> Self {
        Self {
            ip,
            route: route.into(),
            session_token: None,
            user_id: None,
        }
    }

    pub fn with_session(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Decision for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Authorized {
        user_id: Uuid,
        session_id: Option<Uuid>,
        /// The session is close to expiry and should be rotated
        rotation_due: bool,
    },
    /// No identity was presented and the request is within quota
    Anonymous,
    Unauthorized,
    Forbidden {
        reason: String,
    },
    RateLimited {
        retry_after_seconds: u64,
    },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Authorized { .. } | Verdict::Anonymous)
    }
}

/// Composes the session manager, ban gate and rate limiter
#[derive(Clone)]
pub struct AccessController {
    sessions: SessionManager,
    bans: BanGate,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
    timeouts: TimeoutConfig,
    retry: RetryConfig,
    rotation_window: ChronoDuration,
    revoke_all_on_reuse: bool,
}

impl AccessController {
    pub fn new(
        sessions: SessionManager,
        bans: BanGate,
        limiter: RateLimiter,
        clock: Arc<dyn Clock>,
        config: &AccessConfig,
    ) -> Self {
        let SessionConfig {
            rotation_window_seconds,
            revoke_all_on_reuse,
            ..
        } = config.session;

        Self {
            sessions,
            bans,
            limiter,
            clock,
            timeouts: config.timeouts.clone(),
            retry: config.retry.clone(),
            rotation_window: ChronoDuration::seconds(rotation_window_seconds as i64),
            revoke_all_on_reuse,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn bans(&self) -> &BanGate {
        &self.bans
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Decide whether `request` may proceed
    pub async fn check(&self, request: &AccessRequest) -> Verdict {
        if let Some(verdict) = self.check_rate_limit(request).await {
            return verdict;
        }

        let mut session_id = None;
        let mut rotation_due = false;
        let mut user_id = request.user_id;

        if let Some(token) = request.session_token.as_deref() {
            let Some((id, secret)) = parse_session_token(token) else {
                debug!("Malformed session token from {}", request.ip);
                return Verdict::Unauthorized;
            };

            let verified = bounded(self.timeouts.session_ms, self.sessions.verify(id, secret));
            let session = match verified.await {
                Some(Ok(session)) => session,
                Some(Err(SessionError::SecretReuse { user_id })) => {
                    warn!(
                        "Superseded session token of user {} presented for session {}",
                        user_id, id
                    );
                    return Verdict::Unauthorized;
                }
                Some(Err(e)) if e.is_unauthorized() => {
                    debug!("Session {} rejected: {}", id, e);
                    return Verdict::Unauthorized;
                }
                Some(Err(e)) => {
                    error!("Session store failed for {}, rejecting: {}", id, e);
                    return Verdict::Unauthorized;
                }
                None => {
                    error!("Session check for {} timed out, rejecting", id);
                    return Verdict::Unauthorized;
                }
            };

            if user_id.is_some_and(|claimed| claimed != session.user_id) {
                warn!(
                    "Session {} presented for a different user than its owner",
                    session.id
                );
                return Verdict::Unauthorized;
            }

            user_id = Some(session.user_id);
            session_id = Some(session.id);
            rotation_due = session.expires_at - self.clock.now() <= self.rotation_window;
        }

        let Some(user_id) = user_id else {
            return Verdict::Anonymous;
        };

        match self.current_ban(user_id).await {
            Ok(None) => Verdict::Authorized {
                user_id,
                session_id,
                rotation_due,
            },
            Ok(Some(ban)) => {
                info!("Refused banned user {} on {}", user_id, request.route);
                Verdict::Forbidden {
                    reason: ban.active_reason().unwrap_or_default().to_string(),
                }
            }
            Err(_) => Verdict::Unauthorized,
        }
    }

    /// Start a session after the caller has authenticated the user
    ///
    /// Banned users get no new session.
    pub async fn open_session(
        &self,
        user_id: Uuid,
        device_id: &str,
        ip: IpAddr,
    ) -> AccessResult<IssuedSession> {
        self.ensure_not_banned(user_id).await?;

        let ip = ip.to_string();
        let issued = with_backoff(
            &self.retry,
            "session issue",
            |e: &SessionError| matches!(e, SessionError::Store(s) if s.is_transient()),
            || self.sessions.issue(user_id, device_id, &ip),
        )
        .await?;
        Ok(issued)
    }

    /// Rotate a session's refresh secret
    ///
    /// A replayed pre-rotation secret revokes every session of the owner
    /// when `revoke_all_on_reuse` is set. All failures look the same.
    pub async fn refresh(
        &self,
        session_id: Uuid,
        presented_secret: &str,
    ) -> AccessResult<RotatedSession> {
        let session = self.sessions.validate(session_id).await?;
        self.ensure_not_banned(session.user_id).await?;

        match self.sessions.rotate(session_id, presented_secret).await {
            Ok(rotated) => Ok(rotated),
            Err(SessionError::SecretReuse { user_id }) => {
                if self.revoke_all_on_reuse {
                    warn!(
                        "Replayed refresh secret on session {}, revoking all sessions of user {}",
                        session_id, user_id
                    );
                    self.sessions.revoke_all_for_user(user_id).await?;
                } else {
                    warn!("Replayed refresh secret on session {}", session_id);
                }
                Err(AccessError::Unauthorized)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ban a user, retrying transient store failures
    pub async fn ban_user(&self, user_id: Uuid, reason: &str) -> AccessResult<Ban> {
        let ban = with_backoff(&self.retry, "ban", BanError::is_transient, || {
            self.bans.set_ban(user_id, reason)
        })
        .await?;
        Ok(ban)
    }

    async fn check_rate_limit(&self, request: &AccessRequest) -> Option<Verdict> {
        if !self.limiter.is_limited(&request.route) {
            return None;
        }

        match bounded(
            self.timeouts.rate_limit_ms,
            self.limiter.record(request.ip, &request.route),
        )
        .await
        {
            Some(Ok(RateDecision::Allowed)) => None,
            Some(Ok(RateDecision::Throttled {
                retry_after_seconds,
            })) => Some(Verdict::RateLimited {
                retry_after_seconds,
            }),
            Some(Err(e)) => {
                warn!(
                    "Request log unavailable, letting {} through on {}: {}",
                    request.ip, request.route, e
                );
                None
            }
            None => {
                warn!(
                    "Rate limit check timed out, letting {} through on {}",
                    request.ip, request.route
                );
                None
            }
        }
    }

    /// Ban lookup with the ban timeout applied; failures are errors, never "not banned"
    async fn current_ban(&self, user_id: Uuid) -> Result<Option<Ban>, AccessError> {
        match bounded(self.timeouts.ban_ms, self.bans.active_ban(user_id)).await {
            Some(Ok(ban)) => Ok(ban),
            Some(Err(e)) => {
                error!("Ban lookup failed for user {}, rejecting: {}", user_id, e);
                Err(AccessError::StoreUnavailable)
            }
            None => {
                error!("Ban lookup timed out for user {}, rejecting", user_id);
                Err(AccessError::StoreUnavailable)
            }
        }
    }

    async fn ensure_not_banned(&self, user_id: Uuid) -> AccessResult<()> {
        match self.current_ban(user_id).await? {
            Some(ban) => Err(AccessError::UserBanned {
                reason: ban.active_reason().unwrap_or_default().to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// `None` when `fut` did not finish within `millis`
async fn bounded<T>(millis: u64, fut: impl Future<Output = T>) -> Option<T> {
    tokio::time::timeout(Duration::from_millis(millis), fut)
        .await
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, UuidGenerator};
    use crate::config::RateLimitRule;
    use crate::store::MemoryStore;

    struct Fixture {
        controller: AccessController,
        clock: Arc<ManualClock>,
        sessions_db: Arc<MemoryStore>,
        bans_db: Arc<MemoryStore>,
        log_db: Arc<MemoryStore>,
    }

    /// Separate stores per table so outages can be injected one at a time
    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let (sessions_db, bans_db, log_db) = (
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryStore::new()),
        );

        let mut config = AccessConfig::default();
        config.session.ttl_seconds = 3600;
        config.session.rotation_window_seconds = 600;
        config.rate_limit.rules = vec![RateLimitRule::new("login", 60, 2)];
        config.timeouts = TimeoutConfig {
            rate_limit_ms: 20,
            session_ms: 20,
            ban_ms: 20,
        };
        config.retry = RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
        };

        let sessions = SessionManager::new(
            sessions_db.clone(),
            clock.clone(),
            Arc::new(UuidGenerator),
            &config.session,
        );
        let bans = BanGate::new(bans_db.clone(), sessions.clone(), clock.clone());
        let limiter = RateLimiter::new(log_db.clone(), clock.clone(), &config.rate_limit);
        let controller = AccessController::new(sessions, bans, limiter, clock.clone(), &config);

        Fixture {
            controller,
            clock,
            sessions_db,
            bans_db,
            log_db,
        }
    }

    fn ip() -> IpAddr {
        "1.2.3.4".parse().unwrap()
    }

    async fn login(f: &Fixture, user: Uuid) -> IssuedSession {
        f.controller
            .open_session(user, &Uuid::new_v4().to_string(), ip())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_valid_session_is_authorized() {
        let f = fixture();
        let user = Uuid::new_v4();
        let issued = login(&f, user).await;

        let verdict = f
            .controller
            .check(&AccessRequest::new(ip(), "post").with_session(&issued.session_token))
            .await;

        assert_eq!(
            verdict,
            Verdict::Authorized {
                user_id: user,
                session_id: Some(issued.session_id),
                rotation_due: false,
            }
        );
    }

    #[tokio::test]
    async fn test_rotation_due_near_expiry() {
        let f = fixture();
        let issued = login(&f, Uuid::new_v4()).await;

        f.clock.advance(ChronoDuration::seconds(3100));
        let verdict = f
            .controller
            .check(&AccessRequest::new(ip(), "post").with_session(&issued.session_token))
            .await;

        assert!(matches!(
            verdict,
            Verdict::Authorized {
                rotation_due: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_anonymous_request_within_quota() {
        let f = fixture();
        let verdict = f.controller.check(&AccessRequest::new(ip(), "login")).await;
        assert_eq!(verdict, Verdict::Anonymous);
    }

    #[tokio::test]
    async fn test_rate_limit_short_circuits_before_session_checks() {
        let f = fixture();
        let issued = login(&f, Uuid::new_v4()).await;
        let request =
            AccessRequest::new(ip(), "login").with_session(&issued.session_token);

        f.controller.check(&request).await;
        f.controller.check(&request).await;

        // session store outage must not matter once throttled
        f.sessions_db.set_unavailable(true);
        let verdict = f.controller.check(&request).await;
        assert!(matches!(verdict, Verdict::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_garbage_and_unknown_tokens_are_unauthorized() {
        let f = fixture();

        let garbage = AccessRequest::new(ip(), "post").with_session("not-a-session");
        assert_eq!(f.controller.check(&garbage).await, Verdict::Unauthorized);

        let unknown = AccessRequest::new(ip(), "post")
            .with_session(format!("{}.{}", Uuid::new_v4(), "secret"));
        assert_eq!(f.controller.check(&unknown).await, Verdict::Unauthorized);
    }

    #[tokio::test]
    async fn test_session_id_without_secret_is_unauthorized() {
        let f = fixture();
        let user = Uuid::new_v4();
        let issued = login(&f, user).await;
        f.controller
            .refresh(issued.session_id, &issued.refresh_secret)
            .await
            .unwrap();

        // the id is visible in session listings, so it must not be enough
        let listed = f.controller.sessions().list_active(user).await.unwrap();
        let bare = AccessRequest::new(ip(), "post").with_session(listed[0].id.to_string());
        assert_eq!(f.controller.check(&bare).await, Verdict::Unauthorized);

        let guessed = AccessRequest::new(ip(), "post")
            .with_session(format!("{}.{}", listed[0].id, "guessed-secret"));
        assert_eq!(f.controller.check(&guessed).await, Verdict::Unauthorized);
    }

    #[tokio::test]
    async fn test_token_stops_working_after_rotation() {
        let f = fixture();
        let issued = login(&f, Uuid::new_v4()).await;
        let rotated = f
            .controller
            .refresh(issued.session_id, &issued.refresh_secret)
            .await
            .unwrap();

        let stale = AccessRequest::new(ip(), "post").with_session(&issued.session_token);
        assert_eq!(f.controller.check(&stale).await, Verdict::Unauthorized);

        let current = AccessRequest::new(ip(), "post").with_session(&rotated.session_token);
        assert!(f.controller.check(&current).await.is_allowed());
    }

    #[tokio::test]
    async fn test_session_of_another_user_is_unauthorized() {
        let f = fixture();
        let issued = login(&f, Uuid::new_v4()).await;

        let request = AccessRequest::new(ip(), "post")
            .with_session(&issued.session_token)
            .with_user(Uuid::new_v4());
        assert_eq!(f.controller.check(&request).await, Verdict::Unauthorized);
    }

    #[tokio::test]
    async fn test_ban_overrides_valid_identity() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.controller.ban_user(user, "spam").await.unwrap();

        let verdict = f
            .controller
            .check(&AccessRequest::new(ip(), "comment").with_user(user))
            .await;
        assert_eq!(
            verdict,
            Verdict::Forbidden {
                reason: "spam".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_request_log_outage_fails_open() {
        let f = fixture();
        f.log_db.set_unavailable(true);

        let verdict = f.controller.check(&AccessRequest::new(ip(), "login")).await;
        assert_eq!(verdict, Verdict::Anonymous);
    }

    #[tokio::test]
    async fn test_slow_request_log_fails_open() {
        let f = fixture();
        f.log_db.set_latency(std::time::Duration::from_millis(200));

        let verdict = f.controller.check(&AccessRequest::new(ip(), "login")).await;
        assert_eq!(verdict, Verdict::Anonymous);
    }

    #[tokio::test]
    async fn test_ban_store_outage_fails_closed() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.bans_db.set_unavailable(true);

        let verdict = f
            .controller
            .check(&AccessRequest::new(ip(), "comment").with_user(user))
            .await;
        assert_eq!(verdict, Verdict::Unauthorized);
    }

    #[tokio::test]
    async fn test_slow_ban_store_fails_closed() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.bans_db.set_latency(std::time::Duration::from_millis(200));

        let verdict = f
            .controller
            .check(&AccessRequest::new(ip(), "comment").with_user(user))
            .await;
        assert_eq!(verdict, Verdict::Unauthorized);
    }

    #[tokio::test]
    async fn test_session_store_outage_fails_closed() {
        let f = fixture();
        let issued = login(&f, Uuid::new_v4()).await;
        f.sessions_db.set_unavailable(true);

        let verdict = f
            .controller
            .check(&AccessRequest::new(ip(), "post").with_session(&issued.session_token))
            .await;
        assert_eq!(verdict, Verdict::Unauthorized);
    }

    #[tokio::test]
    async fn test_slow_session_store_fails_closed() {
        let f = fixture();
        let issued = login(&f, Uuid::new_v4()).await;
        f.sessions_db.set_latency(std::time::Duration::from_millis(200));

        let verdict = f
            .controller
            .check(&AccessRequest::new(ip(), "post").with_session(&issued.session_token))
            .await;
        assert_eq!(verdict, Verdict::Unauthorized);
    }

    #[tokio::test]
    async fn test_banned_user_cannot_open_session() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.controller.ban_user(user, "fraud").await.unwrap();

        let err = f
            .controller
            .open_session(user, &Uuid::new_v4().to_string(), ip())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AccessError::UserBanned {
                reason: "fraud".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_open_session_rejects_bad_device_id() {
        let f = fixture();
        let err = f
            .controller
            .open_session(Uuid::new_v4(), "device-1", ip())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::InvalidDeviceId(_)));
    }

    #[tokio::test]
    async fn test_replayed_secret_revokes_all_sessions() {
        let f = fixture();
        let user = Uuid::new_v4();
        let phone = login(&f, user).await;
        let laptop = login(&f, user).await;

        let rotated = f
            .controller
            .refresh(phone.session_id, &phone.refresh_secret)
            .await
            .unwrap();
        assert_eq!(rotated.session_id, phone.session_id);

        let err = f
            .controller
            .refresh(phone.session_id, &phone.refresh_secret)
            .await
            .unwrap_err();
        assert_eq!(err, AccessError::Unauthorized);

        let sessions = f.controller.sessions();
        assert!(!sessions.is_valid(phone.session_id).await.unwrap());
        assert!(!sessions.is_valid(laptop.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_ban_user_retries_transient_failures() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.bans_db.set_unavailable(true);

        let err = f.controller.ban_user(user, "spam").await.unwrap_err();
        assert_eq!(err, AccessError::StoreUnavailable);

        f.bans_db.set_unavailable(false);
        f.controller.ban_user(user, "spam").await.unwrap();
        assert!(f.controller.bans().is_banned(user).await.unwrap());
    }
}
