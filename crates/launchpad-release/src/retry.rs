//! Timeouts and bounded retries for cluster calls.
//!
//! Every controller call runs under `call_timeout`. Transient failures
//! (unreachable, timeout, resource unavailable) are retried with
//! exponential backoff: the delay starts at `base_delay`, doubles after
//! each failure, and is capped at `max_delay`. Exhausting the attempts is
//! a definitive failure.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use launchpad_core::config::RetryConfig;
use launchpad_traffic::TrafficResult;

use crate::error::DeploymentError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            call_timeout,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            Duration::from_millis(config.call_timeout_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Worst-case wall time of one retried call.
    pub fn budget(&self) -> Duration {
        let waits: Duration = (1..self.max_attempts).map(|r| self.delay_for(r)).sum();
        self.call_timeout * self.max_attempts + waits
    }

    /// Run `call` until it succeeds, fails permanently, or runs out of
    /// attempts.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, DeploymentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TrafficResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let error = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) if !e.is_retryable() => return Err(e.into()),
                Ok(Err(e)) => DeploymentError::from(e),
                Err(_) => DeploymentError::Timeout(format!(
                    "{operation} after {}ms",
                    self.call_timeout.as_millis()
                )),
            };

            if attempt >= self.max_attempts {
                warn!(operation, attempts = attempt, error = %error, "retry budget exhausted");
                return Err(error);
            }
            let delay = self.delay_for(attempt);
            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
