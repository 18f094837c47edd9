//! Bounded retries with exponential backoff.
//!
//! Only [`SdkError::is_retryable`] errors (5xx and transport failures) are
//! attempted again. Everything else, timeouts included, returns on the first
//! occurrence.

use crate::config::ClientConfig;
use crate::error::{Result, SdkError};
use std::future::Future;
use std::time::Duration;

/// Attempt budget and delay curve for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Build the policy from client configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
        }
    }

    /// A policy that never retries.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// Run `action` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent.
///
/// `action` receives the 1-based attempt number. A retryable error returned
/// from the final attempt is stamped with the number of attempts made.
pub async fn retry_with_policy<F, Fut, T>(
    operation: &str,
    policy: RetryPolicy,
    mut action: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match action(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation, attempts = attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = policy.backoff_delay(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(operation, attempts = attempt, error = %err, "Retry budget exhausted");
                return Err(err.with_attempts(attempt));
            }
            Err(err) => {
                tracing::debug!(operation, attempt, error = %err, "Non-retryable failure");
                return Err(err);
            }
        }
    }
}
