//! Bounded retry with exponential backoff.
//!
//! Wraps any operation producing a [`Result`] and re-runs it when it fails
//! with an error that may go away on its own, as told by
//! [`classify::is_retryable`]. Between attempts it sleeps
//! `base_delay * 2^(attempt - 1)`, unless a rate-limited response told us how
//! long to wait.
//!
//! # Example
//!
//! ```rust
//! use snipurl::retry::{retry, RetryPolicy};
//!
//! let urls = retry(RetryPolicy::default(), || gateway.urls(&query)).await?;
//! ```

use std::{future::Future, time::Duration};

use exponential_backoff::Backoff;
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};

use crate::{
    classify,
    error::{Error, ErrorKind, Result},
};

/// Status codes after which repeating the same request is pointless.
const TERMINAL_STATUS: [u16; 4] = [400, 401, 403, 404];

#[serde_as]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,

    /// Delay after the first failed attempt, in milliseconds.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_delay: Duration,

    /// Ceiling of the exponential delay, in milliseconds. Never below
    /// `base_delay`.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    fn backoff(&self) -> Backoff {
        // `Backoff` clamps between both bounds and panics if they cross.
        let max_delay = self.max_delay.max(self.base_delay);
        let mut backoff = Backoff::new(self.max_attempts, self.base_delay, max_delay);
        backoff.set_factor(2);
        backoff.set_jitter(0.0);
        backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            base_delay: Self::DEFAULT_BASE_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
        }
    }
}

/// Whether an error rules out another attempt.
fn is_terminal(error: &Error) -> bool {
    error
        .status_code()
        .is_some_and(|status| TERMINAL_STATUS.contains(&status))
        || !classify::is_retryable(error)
}

/// Runs `operation` until it succeeds or the policy is exhausted.
///
/// Returns the first success, or the error of the last attempt. Errors that
/// are not retryable, and any with status 400, 401, 403 or 404, are returned
/// immediately.
///
/// # Errors
///
/// Will return `Err` with the last error when every attempt failed or the
/// failure is not worth retrying.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let backoff = policy.backoff();
    let mut delays = (&backoff).into_iter();

    let mut attempt = 0;
    loop {
        attempt += 1;

        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if attempt >= max_attempts || is_terminal(&error) {
            return Err(error);
        }

        let scheduled = delays.next().flatten().unwrap_or(policy.base_delay);
        let delay = match (&error.kind, error.retry_after) {
            (ErrorKind::RateLimit, Some(retry_after)) => retry_after,
            _ => scheduled,
        };

        debug!(
            "attempt {attempt}/{max_attempts} failed: {error}; retrying in {:.1}s",
            delay.as_secs_f32()
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;
    use tokio::time::Instant;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn returns_first_success() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();

        let result = retry(RetryPolicy::default(), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::network("connection reset"))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_with_last_error() {
        let calls = &AtomicU32::new(0);

        let result: Result<()> = retry(RetryPolicy::new(4, Duration::from_millis(10)), move || async move {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::internal(format!("failure {call}"))
                .with_status(StatusCode::SERVICE_UNAVAILABLE))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.unwrap_err().message, "failure 3");
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_statuses_are_not_retried() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ] {
            let calls = &AtomicU32::new(0);
            let result: Result<()> = retry(RetryPolicy::default(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::new(ErrorKind::from_status(status), "nope").with_status(status))
            })
            .await;

            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 1, "status {status}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_run_once() {
        let failures = [
            Error::new(ErrorKind::Conflict, "email taken").with_status(StatusCode::CONFLICT),
            Error::validation("name is required")
                .with_status(StatusCode::UNPROCESSABLE_ENTITY),
            Error::new(ErrorKind::Unknown, "expected value at line 1 column 1"),
        ];

        for failure in failures {
            let calls = &AtomicU32::new(0);
            let failure = &failure;
            let result: Result<()> = retry(RetryPolicy::default(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(failure.clone())
            })
            .await;

            assert_eq!(result.unwrap_err().kind, failure.kind);
            assert_eq!(calls.load(Ordering::SeqCst), 1, "{failure}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn base_delay_above_ceiling() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();

        let result = retry(
            RetryPolicy::new(3, Duration::from_secs(90)),
            move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::network("connection reset"))
                } else {
                    Ok(())
                }
            },
        )
        .await;

        assert_eq!(result, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_replaces_backoff() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();

        let result = retry(
            RetryPolicy::new(2, Duration::from_secs(10)),
            move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::rate_limited("slow down")
                        .with_status(StatusCode::TOO_MANY_REQUESTS)
                        .with_retry_after(Duration::from_millis(2000)))
                } else {
                    Ok(())
                }
            },
        )
        .await;

        assert_eq!(result, Ok(()));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(10), "{elapsed:?}");
    }
}
