//! Retry-with-backoff for single network operations.
//!
//! Every retried call in the service runs under a [`BackoffPolicy`]: the
//! wait grows geometrically from `initial_interval` by `multiplier`, each
//! wait is jittered by `randomization_factor`, and the whole operation is
//! abandoned once `max_elapsed_time` of cumulative waiting would be
//! exceeded. Callers classify each attempt as retryable or permanent via
//! [`RetryOutcome`].

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Default first wait between attempts.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);

/// Default growth factor applied to the wait after each failed attempt.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Default jitter fraction applied to each wait.
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

/// Default cumulative retry budget for one operation.
pub const DEFAULT_MAX_ELAPSED_TIME: Duration = Duration::from_secs(5 * 60);

fn default_initial_interval() -> Duration {
    DEFAULT_INITIAL_INTERVAL
}

fn default_multiplier() -> f64 {
    DEFAULT_MULTIPLIER
}

fn default_randomization_factor() -> f64 {
    DEFAULT_RANDOMIZATION_FACTOR
}

fn default_max_elapsed_time() -> Duration {
    DEFAULT_MAX_ELAPSED_TIME
}

/// Retry schedule for a single operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// First wait between attempts.
    #[serde(default = "default_initial_interval", with = "humantime_serde")]
    pub initial_interval: Duration,
    /// Growth factor for successive waits. Must be >= 1.0.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter fraction in [0, 1): each wait is drawn uniformly from
    /// `interval * (1 - factor)` to `interval * (1 + factor)`.
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,
    /// Cumulative wait budget; the operation fails with exhaustion once
    /// the next wait would push past it.
    #[serde(default = "default_max_elapsed_time", with = "humantime_serde")]
    pub max_elapsed_time: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            max_elapsed_time: DEFAULT_MAX_ELAPSED_TIME,
        }
    }
}

impl BackoffPolicy {
    /// Apply jitter to a computed interval.
    ///
    /// The result never exceeds `max_elapsed_time`, which also caps any
    /// single wait.
    fn jittered(&self, interval: Duration) -> Duration {
        let capped = interval.min(self.max_elapsed_time);
        if self.randomization_factor <= 0.0 {
            return capped;
        }

        let delta = capped.mul_f64(self.randomization_factor);
        let low = capped.saturating_sub(delta);
        let span = delta.saturating_mul(2);
        let drawn = low + span.mul_f64(rand::rng().random_range(0.0..1.0));
        drawn.min(self.max_elapsed_time)
    }

    /// The undithered wait following `current`.
    fn next_interval(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.multiplier.max(1.0))
            .min(self.max_elapsed_time)
    }
}

/// Result of a single attempt, classified by the caller.
pub enum RetryOutcome<T, E> {
    /// Operation succeeded.
    Success(T),
    /// Operation failed transiently (network, 5xx, timeout); worth retrying.
    Retry(E),
    /// Operation failed permanently (4xx, malformed body); do not retry.
    Fail(E),
}

/// Terminal result of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::fmt::Display + std::fmt::Debug,
{
    /// The retry budget ran out; `last` is the final transient error.
    #[error("retries exhausted after {elapsed:?}: {last}")]
    Exhausted { elapsed: Duration, last: E },

    /// The operation failed with a non-retryable error.
    #[error("{0}")]
    Permanent(E),

    /// Shutdown was requested while waiting or between attempts.
    #[error("operation cancelled")]
    Cancelled,
}

/// Drive an async operation under a backoff policy.
///
/// The `operation` closure receives the current attempt number (0-indexed)
/// and classifies its own result. Cancellation is observed between
/// attempts and during waits, never mid-request.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RetryOutcome<T, E>>,
    E: std::fmt::Display + std::fmt::Debug,
{
    let started = Instant::now();
    let mut interval = policy.initial_interval;
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match operation(attempt).await {
            RetryOutcome::Success(value) => return Ok(value),
            RetryOutcome::Fail(err) => return Err(RetryError::Permanent(err)),
            RetryOutcome::Retry(err) => {
                let delay = policy.jittered(interval);
                let elapsed = started.elapsed();
                if elapsed + delay >= policy.max_elapsed_time {
                    return Err(RetryError::Exhausted { elapsed, last: err });
                }

                tracing::warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient error"
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }

                interval = policy.next_interval(interval);
                attempt += 1;
            }
        }
    }
}
