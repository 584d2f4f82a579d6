use std::thread;
use std::time::Duration;

use log::warn;

use crate::error::AdapterError;

/// Attempt budget and exponential backoff for one provider call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    pub const fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// No waiting between attempts.
    pub const fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before attempt `attempt + 1`, doubling from `base_delay`.
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(30))
    }
}

/// Runs `f` until it succeeds, fails with a non-transient error or the
/// attempt budget is spent.
pub fn call_with_retry<F, T>(label: &str, config: &RetryConfig, mut f: F) -> Result<T, AdapterError>
where
    F: FnMut() -> Result<T, AdapterError>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempt >= attempts => {
                return Err(AdapterError::retry_exhausted(attempts, err))
            }
            Err(err) => {
                let delay = config.backoff_delay(attempt);
                warn!("[{label}] attempt {attempt}/{attempts} failed: {err}; retrying in {delay:?}");
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
