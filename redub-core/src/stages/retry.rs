use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::config::RetrySection;

use super::error::{StageError, StageResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A single attempt bounded by `timeout`.
    pub fn once(timeout: Duration) -> Self {
        Self {
            attempts: 1,
            timeout,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay after the zero-based `attempt` failed, doubling up to `max_backoff`.
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Runs `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Every attempt is bounded by the policy timeout; only errors reported as
    /// transient are retried.
    pub async fn run<F, Fut, T>(&self, label: &str, mut operation: F) -> StageResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = StageResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            let result = match timeout(self.timeout, operation(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(StageError::Timeout {
                    operation: label.to_string(),
                    timeout: self.timeout,
                }),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 >= attempts || !err.is_transient() => return Err(err),
                Err(err) => {
                    let delay = self.compute_delay(attempt);
                    warn!(attempt = attempt + 1, wait = ?delay, stage = label, error = %err, "retrying operation");
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        Self {
            attempts: section.max_attempts.max(1),
            timeout: section.timeout(),
            initial_backoff: Duration::from_millis(section.backoff_initial_ms),
            max_backoff: Duration::from_millis(section.backoff_max_ms.max(section.backoff_initial_ms)),
        }
    }
}
