//! Retry with exponential backoff.
//!
//! Apply passes are idempotent, so a pass that ended with failures can be
//! re-run as a whole. The operation reports whether its outcome warrants
//! another attempt; hard errors are returned immediately.

use anyhow::Result;
use std::thread;
use std::time::Duration;

/// Retry policy
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between attempts
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// A policy allowing `retries` attempts after the first
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            ..Default::default()
        }
    }

    /// Delay after a failed attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

/// Notified before each retry
pub trait RetryCallback {
    /// `attempt` is the 1-indexed attempt that just failed
    fn on_retry(&self, attempt: u32, max_attempts: u32, reason: &str, delay: Duration);
}

/// Run `operation` until `needs_retry` returns `None` or attempts run out.
///
/// The outcome of the last attempt is returned either way; the caller
/// decides what a remaining failure means.
pub fn with_retry<T, F, P>(
    config: &RetryConfig,
    callback: &dyn RetryCallback,
    mut operation: F,
    needs_retry: P,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
    P: Fn(&T) -> Option<String>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let outcome = operation()?;
        attempt += 1;

        let Some(reason) = needs_retry(&outcome) else {
            return Ok(outcome);
        };
        if attempt >= max_attempts {
            log::debug!("Giving up after {attempt} attempts: {reason}");
            return Ok(outcome);
        }

        let delay = config.delay_for_attempt(attempt - 1);
        callback.on_retry(attempt, max_attempts, &reason, delay);
        thread::sleep(delay);
    }
}
