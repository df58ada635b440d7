//! A bounded retry combinator for fallible async operations.
//!
//! `max_attempts` counts every call of the operation, including the first.
//! Callers that need to distinguish "ran out of attempts" from other
//! failures get a [`RetryError`] carrying the attempt count and the last
//! error seen.

use std::time::Duration;

use thiserror::Error;

use crate::prelude::*;

/// How long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Retry immediately.
    None,
    /// Wait the same duration before every retry.
    Fixed(Duration),
    /// Wait `base`, then double each retry, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl BackoffPolicy {
    fn delay_before_attempt(&self, attempt: usize) -> Option<Duration> {
        // `attempt` is 1-based; there is no delay before the first attempt.
        debug_assert!(attempt >= 2);
        match self {
            BackoffPolicy::None => None,
            BackoffPolicy::Fixed(delay) => Some(*delay),
            BackoffPolicy::Exponential { base, max } => {
                let doublings = u32::try_from(attempt - 2).unwrap_or(u32::MAX);
                let delay = base
                    .checked_mul(2u32.saturating_pow(doublings))
                    .unwrap_or(*max);
                Some(delay.min(*max))
            }
        }
    }
}

/// All attempts failed.
#[derive(Debug, Error)]
#[error("failed after {attempts} attempts: {last_error}")]
pub struct RetryError {
    /// How many times the operation was called.
    pub attempts: usize,
    /// The error from the final attempt.
    pub last_error: anyhow::Error,
}

/// Call `op` until it succeeds, up to `max_attempts` times, sleeping
/// between attempts according to `policy`.
pub async fn retry_with_backoff<T, F, Fut>(
    max_attempts: usize,
    policy: &BackoffPolicy,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    assert!(max_attempts >= 1, "max_attempts must be at least 1");
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts => {
                debug!(%err, attempt, max_attempts, "attempt failed, retrying");
                attempt += 1;
                if let Some(delay) = policy.delay_before_attempt(attempt) {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(err) => {
                return Err(RetryError {
                    attempts: attempt,
                    last_error: err,
                });
            }
        }
    }
}
