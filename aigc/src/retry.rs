//! Retry with exponential backoff for upstream calls
//!
//! Only transient [`UpstreamError`]s are retried. A terminal error ends the
//! loop at once; running out of attempts (or hitting the overall deadline)
//! yields [`Error::RetriesExhausted`] carrying the last failure.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::upstream::UpstreamError;
use crate::{Error, Result};

/// Retry settings (`[retry]` section)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Overall time allowed for one logical call, retries included. No new
    /// attempt starts once the next backoff would cross it.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_deadline_ms() -> u64 {
    90_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            deadline_ms: default_deadline_ms(),
        }
    }
}

/// Retry policy applied around each upstream invocation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_millis(default_max_delay_ms()).max(base_delay),
            deadline: Duration::from_millis(default_deadline_ms()),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        let base_delay = Duration::from_millis(config.base_delay_ms);
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_millis(config.max_delay_ms).max(base_delay),
            deadline: Duration::from_millis(config.deadline_ms),
        }
    }

    /// Backoff before attempt `attempt + 1` (attempts are 1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails terminally, or the budget is spent.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, UpstreamError>>,
    {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            metrics::counter!("aigc_upstream_attempts_total", "operation" => operation).increment(1);

            let error = match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Upstream call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            metrics::counter!(
                "aigc_upstream_failures_total",
                "operation" => operation,
                "kind" => error.kind()
            )
            .increment(1);

            if !error.is_transient() {
                warn!(operation, attempt, error = %error, "Upstream call failed (not retryable)");
                return Err(Error::Upstream(error));
            }

            if attempt >= self.max_attempts {
                warn!(operation, attempts = attempt, error = %error, "Upstream retries exhausted");
                return Err(Error::RetriesExhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.delay_for(attempt);
            if started.elapsed() + delay >= self.deadline {
                warn!(
                    operation,
                    attempts = attempt,
                    deadline_ms = self.deadline.as_millis() as u64,
                    error = %error,
                    "Upstream retry deadline reached"
                );
                return Err(Error::RetriesExhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            metrics::counter!("aigc_upstream_retries_total", "operation" => operation).increment(1);
            debug!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying upstream call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
