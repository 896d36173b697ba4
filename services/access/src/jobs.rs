//! Retention job
//!
//! Periodically drops request-log entries no window can reach and sessions
//! that stopped being valid a while ago. Ban rows are never touched.

use anyhow::Result;
use chrono::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::rate_limiter::RateLimiter;
use crate::session::SessionManager;

/// What one cleanup pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub request_log_entries: u64,
    pub sessions: u64,
}

#[derive(Clone)]
pub struct RetentionJob {
    sessions: SessionManager,
    limiter: RateLimiter,
    session_grace: Duration,
}

impl RetentionJob {
    pub fn new(sessions: SessionManager, limiter: RateLimiter, purge_grace_seconds: u64) -> Self {
        Self {
            sessions,
            limiter,
            session_grace: Duration::seconds(purge_grace_seconds as i64),
        }
    }

    /// Run one cleanup pass
    ///
    /// A failure on one table does not stop the other from being cleaned.
    pub async fn run_once(&self) -> RetentionReport {
        let mut report = RetentionReport::default();

        match self.limiter.prune().await {
            Ok(pruned) => report.request_log_entries = pruned,
            Err(e) => error!("Failed to prune request log: {}", e),
        }

        match self.sessions.purge_stale(self.session_grace).await {
            Ok(purged) => report.sessions = purged,
            Err(e) => error!("Failed to purge stale sessions: {}", e),
        }

        report
    }

    /// Schedule [`RetentionJob::run_once`] on a six-field cron expression
    pub async fn start(self, schedule: &str) -> Result<JobScheduler> {
        let scheduler = JobScheduler::new().await?;
        let job = self;

        let cron = Job::new_async(schedule, move |_, _| {
            let job = job.clone();
            Box::pin(async move {
                let report = job.run_once().await;
                info!(
                    "Retention pass removed {} request log entries and {} sessions",
                    report.request_log_entries, report.sessions
                );
            })
        })?;

        scheduler.add(cron).await?;
        scheduler.start().await?;

        info!("Started retention scheduler with schedule: {}", schedule);
        Ok(scheduler)
    }
}
