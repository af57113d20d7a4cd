use std::{future::Future, time::Duration};

use rand::Rng;
use tracing::{debug, warn};

use super::{
    config::{DEFAULT_BACKOFF_FACTOR, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS},
    RecoveryError,
};

/// Jitter spreads each delay uniformly over +/- this fraction.
const JITTER_RATIO: f64 = 0.25;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt:
    /// `min(base * factor^(attempt - 1), max)`, optionally jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.base_delay.as_millis() as f64;
        let max = self.max_delay.as_millis() as f64;
        let mut delay = (base * self.backoff_factor.powi(exponent)).min(max);
        if !delay.is_finite() {
            delay = max;
        }
        if self.jitter {
            let spread = delay * JITTER_RATIO;
            if spread > 0.0 {
                delay += rand::thread_rng().gen_range(-spread..=spread);
            }
        }
        Duration::from_millis(delay.max(0.0).floor() as u64)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` attempts have failed.
pub async fn execute_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    name: &str,
    mut operation: F,
) -> Result<T, RecoveryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RecoveryError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Operation {} succeeded on attempt {}", name, attempt);
                }
                return Ok(value);
            }
            Err(error) if !error.is_retryable() => return Err(error),
            Err(error) if attempt >= max_attempts => {
                warn!(
                    "Operation {} failed after {} attempts: {}",
                    name, attempt, error
                );
                return Err(RecoveryError::RetryExhausted {
                    name: name.to_string(),
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }
            Err(error) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "Operation {} failed on attempt {}: {}, retrying in {:?}",
                    name, attempt, error, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
