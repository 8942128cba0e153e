//! Bounded retry with exponential backoff.
//!
//! Shared by the fetcher (remote documents) and the runner (action
//! execution). The wait after failed attempt `n` is `base * 2^(n-1)`; there is
//! no wait after the final attempt, and every attempt and wait races the
//! cancellation context.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cancel::{Cancellation, Cancelled};

/// Attempt budget and base delay for one retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Backoff {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// `retries` extra attempts beyond the first.
    pub fn from_retries(retries: u32, base_delay: Duration) -> Self {
        Self::new(retries.saturating_add(1), base_delay)
    }

    /// Wait after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("{0}")]
    Cancelled(Cancelled),

    #[error("failed after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: E },
}

/// Run `op` until it succeeds, the budget is spent, or `cancel` ends.
///
/// `op` receives the 1-based attempt number. On success the value and the
/// number of attempts used are returned.
pub async fn retry<T, E, F, Fut>(
    cancel: &Cancellation,
    backoff: &Backoff,
    label: &str,
    mut op: F,
) -> Result<(T, u32), RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = backoff.attempts();
    let mut attempt = 1;
    loop {
        cancel.check().map_err(RetryError::Cancelled)?;

        let outcome = tokio::select! {
            biased;
            cause = cancel.cancelled() => return Err(RetryError::Cancelled(cause)),
            outcome = op(attempt) => outcome,
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempt, "succeeded after retry");
                }
                return Ok((value, attempt));
            }
            Err(last) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last,
                });
            }
            Err(e) => {
                let delay = backoff.delay_for(attempt);
                warn!(
                    label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, retrying"
                );
                cancel.sleep(delay).await.map_err(RetryError::Cancelled)?;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_per_attempt() {
        let b = Backoff::new(5, Duration::from_secs(1));
        assert_eq!(b.delay_for(1), Duration::from_secs(1));
        assert_eq!(b.delay_for(2), Duration::from_secs(2));
        assert_eq!(b.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn delay_saturates_instead_of_overflowing() {
        let b = Backoff::new(100, Duration::from_secs(u64::MAX / 2));
        assert_eq!(b.delay_for(64), Duration::MAX);
    }

    #[test]
    fn from_retries_adds_first_attempt() {
        assert_eq!(Backoff::from_retries(0, Duration::ZERO).max_attempts, 1);
        assert_eq!(Backoff::from_retries(2, Duration::ZERO).max_attempts, 3);
    }

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let (value, attempts) = retry(
            &Cancellation::never(),
            &Backoff::new(3, Duration::ZERO),
            "ok",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>("done") }
            },
        )
        .await
        .unwrap();
        assert_eq!(value, "done");
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_on_later_attempt() {
        let (value, attempts) = retry(
            &Cancellation::never(),
            &Backoff::new(3, Duration::from_millis(1)),
            "flaky",
            |attempt| async move {
                if attempt < 3 {
                    Err(format!("attempt {attempt} failed"))
                } else {
                    Ok(attempt)
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn exhausts_budget_and_keeps_last_error() {
        let calls = AtomicU32::new(0);
        let err = retry(
            &Cancellation::never(),
            &Backoff::new(3, Duration::ZERO),
            "always",
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(format!("boom {attempt}")) }
            },
        )
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            RetryError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "boom 3");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _ = retry(
            &Cancellation::never(),
            &Backoff::new(0, Duration::ZERO),
            "zero",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("nope") }
            },
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_during_backoff_stops_retrying() {
        let (handle, cancel) = Cancellation::new();
        let calls = AtomicU32::new(0);
        let started = std::time::Instant::now();
        let err = retry(&cancel, &Backoff::new(5, Duration::from_secs(30)), "slow", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            handle.cancel();
            async { Err::<(), _>("fail") }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RetryError::Cancelled(Cancelled::Requested)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn already_cancelled_runs_nothing() {
        let (handle, cancel) = Cancellation::new();
        handle.cancel();
        let calls = AtomicU32::new(0);
        let err = retry(&cancel, &Backoff::new(3, Duration::ZERO), "never", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(()) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RetryError::Cancelled(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
