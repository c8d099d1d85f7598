//! Retry policy for transient API failures.

use crate::core::domain::error::ProviderResult;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Backoff schedule for retrying transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts before giving up (the first try counts).
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each failure.
    pub backoff_factor: f64,
    /// Ceiling for the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Runs `operation`, retrying transient failures on the schedule.
///
/// Permanent failures return immediately. When attempts run out, the
/// last transient error is returned unchanged.
pub async fn retry_transient<T, F, Fut>(config: &RetryConfig, mut operation: F) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut delay = config.base_delay;
    let mut attempt: u32 = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                warn!("Attempt {} failed ({}), retrying in {:?}", attempt, e, delay);
                sleep(delay).await;
                delay = delay.mul_f64(config.backoff_factor).min(config.max_delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
