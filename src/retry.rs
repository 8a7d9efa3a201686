// src/retry.rs

//! Retry policy engine for transient transport failures.
//!
//! Computes backoff delays per attempt and drives the retry loop around a
//! single fallible async operation. Whether a failure is worth retrying is
//! decided by [`AppError::is_retryable`]; anything unexpected is propagated
//! immediately rather than retried blindly.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{RequestMetrics, RetryConfig};

/// Backoff growth strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Constant delay
    Fixed,
    /// Delay grows linearly with the attempt number
    Linear,
    /// Delay doubles (by `backoff_factor`) each attempt
    #[default]
    Exponential,
}

/// Immutable retry configuration shared by every retry invocation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// Build a policy from the retry section of the configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            strategy: config.strategy,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
            backoff_factor: config.backoff_factor,
        }
    }

    /// Delay before retrying after attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => (self.base_delay * (attempt + 1)).min(self.max_delay),
            BackoffStrategy::Exponential => self
                .base_delay
                .mul_f64(self.backoff_factor.powi(attempt as i32))
                .min(self.max_delay),
        };

        if self.jitter {
            let factor: f64 = 1.0 + rand::rng().random_range(-0.1..=0.1);
            delay.mul_f64(factor.max(0.0))
        } else {
            delay
        }
    }
}

/// Run `op` with retries per `policy`.
///
/// Retryable failures are retried until attempts are exhausted, sleeping
/// `delay_for(attempt)` in between; each retry bumps the shared retry counter
/// and emits a warning. Non-retryable failures propagate immediately. The
/// last retryable error is propagated once attempts run out.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    metrics: &RequestMetrics,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    log::info!("operation succeeded after {} attempts", attempt + 1);
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                metrics.record_retry();
                log::warn!(
                    "attempt {} failed, retrying in {:.2}s: {}",
                    attempt + 1,
                    delay.as_secs_f64(),
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    log::warn!("giving up after {} attempts: {}", attempt + 1, e);
                } else {
                    log::debug!("not retrying: {e}");
                }
                return Err(e);
            }
        }
    }
}
