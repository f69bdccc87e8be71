//! Bounded exponential retry
//!
//! [`RetryPolicy`] describes the schedule: at most `max_attempts` tries, and
//! after a failed attempt `k` (0-indexed) the caller waits `base * 2^k`. There
//! is no wait after the final attempt. The schedule is driven by
//! `backoff::future::retry_notify` with randomization switched off so the
//! delays are exact.

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Retry schedule for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Create a policy; zero attempts is treated as one
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    /// Delay after failed attempt `attempt` (0-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Sum of all delays a fully exhausted run sleeps
    pub fn total_delay(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|k| self.delay_for(k))
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Deterministic exponential backoff matching [`RetryPolicy::delay_for`]
    pub fn backoff(&self) -> ExponentialBackoff {
        let max_interval = self.delay_for(self.max_attempts.saturating_sub(1));
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_backoff)
            .with_randomization_factor(0.0)
            .with_multiplier(2.0)
            .with_max_interval(max_interval.max(self.base_backoff))
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Final error of a retried operation
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Error returned by the last attempt
    pub error: E,
    /// Attempts made
    pub attempts: u32,
    /// The last error was transient and the attempt budget ran out
    pub exhausted: bool,
}

/// Run `operation` until it succeeds, fails permanently, or the attempt
/// budget is spent
///
/// `operation` receives the 1-based attempt number. `is_transient` decides
/// which errors are worth another attempt.
pub async fn retry_transient<T, E, Op, Fut, C>(
    policy: &RetryPolicy,
    is_transient: C,
    mut operation: Op,
) -> Result<T, RetryFailure<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: Display,
{
    let attempts = AtomicU32::new(0);
    let max_attempts = policy.max_attempts;
    let is_transient = &is_transient;
    let counter = &attempts;

    let result = backoff::future::retry_notify(
        policy.backoff(),
        || {
            let attempt = counter.fetch_add(1, Ordering::Relaxed) + 1;
            let fut = operation(attempt);
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) if is_transient(&e) && attempt < max_attempts => {
                        Err(backoff::Error::transient(e))
                    },
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        },
        |e: E, delay: Duration| {
            tracing::warn!(
                error = %e,
                attempt = counter.load(Ordering::Relaxed),
                max_attempts,
                backoff_ms = delay.as_millis() as u64,
                "Transient failure, retrying"
            );
        },
    )
    .await;

    result.map_err(|error| {
        let exhausted = is_transient(&error);
        RetryFailure {
            error,
            attempts: attempts.load(Ordering::Relaxed),
            exhausted,
        }
    })
}
