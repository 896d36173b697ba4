//! Bounded retry with exponential backoff for store writes

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;

/// Run `op` until it succeeds, fails permanently, or attempts run out
///
/// `is_transient` decides which errors are worth another attempt. The delay
/// doubles after every failure, starting at `base_delay_ms`.
pub async fn with_backoff<T, E, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = Duration::from_millis(config.base_delay_ms);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_transient(&e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation, attempt, max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
