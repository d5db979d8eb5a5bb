//! Exponential backoff for transient backend failures.

use crate::config::RetrySettings;
use crate::error::BackendError;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Backoff is capped here.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no sleeping
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Wait before attempt `attempt + 1`, given that `attempt` (1-based) just failed
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut(u32) -> Result<T, BackendError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    warn!(attempts = attempt, error = %e, "giving up on backend");
                    return Err(BackendError::RetriesExhausted {
                        attempts: attempt,
                        last_error: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "transient backend failure, retrying");
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
