//! Retry policy for single provider calls.
//!
//! The policy is an explicit object applied at the call site: a predicate over
//! the error kind plus an exponential backoff schedule with ±25% jitter.
//! Validation failures are never retried here; they go through repair.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{PersonaError, Result};
use crate::storage::config::RetrySettings;

/// Exponential backoff with jitter, bounded by `max_attempts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
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
            max_delay: Duration::from_millis(settings.max_delay_ms.max(settings.base_delay_ms)),
        }
    }
}

impl RetryPolicy {
    /// Whether `error` should be retried against the same provider.
    ///
    /// Rate limits are only waited out when the provider's requested delay
    /// fits under `max_delay`; longer waits are better spent on another
    /// provider.
    #[must_use]
    pub fn should_retry(&self, error: &PersonaError) -> bool {
        match error {
            PersonaError::RateLimited { retry_after, .. } => {
                retry_after.is_none_or(|wait| wait <= self.max_delay)
            }
            other => other.is_retryable(),
        }
    }

    /// Un-jittered delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1_u32 << exp)
            .min(self.max_delay)
    }

    /// Delay before retry number `attempt`, honouring a server-provided
    /// `Retry-After` when the error carries one.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &PersonaError) -> Duration {
        error.retry_after().map_or_else(
            || apply_jitter(self.base_backoff(attempt)).min(self.max_delay),
            |wait| wait.min(self.max_delay),
        )
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// `max_attempts` is spent. Returns the last error.
    ///
    /// # Errors
    ///
    /// Propagates the final error from `op`.
    pub async fn run<T, F, Fut>(&self, provider: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && self.should_retry(&err) => {
                    let delay = self.delay_for(attempt, &err);
                    tracing::debug!(
                        provider = %provider,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error_code = err.error_code(),
                        "Retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Apply ±25% jitter to prevent synchronized retries.
fn apply_jitter(base: Duration) -> Duration {
    let millis = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let range = millis / 4;
    if range == 0 {
        return base;
    }
    let offset = rand::rng().random_range(0..=range * 2);
    Duration::from_millis(millis - range + offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn server_error() -> PersonaError {
        PersonaError::ConnectionFailure {
            provider: "p".into(),
            status: Some(503),
            message: "unavailable".into(),
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.base_backoff(1), Duration::from_millis(100));
        assert_eq!(policy.base_backoff(2), Duration::from_millis(200));
        assert_eq!(policy.base_backoff(3), Duration::from_millis(400));
        assert_eq!(policy.base_backoff(4), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_quarter() {
        for _ in 0..100 {
            let d = apply_jitter(Duration::from_millis(1_000));
            assert!(d >= Duration::from_millis(750) && d <= Duration::from_millis(1_250));
        }
    }

    #[test]
    fn retry_after_is_honoured() {
        let policy = RetryPolicy::default();
        let err = PersonaError::RateLimited {
            provider: "p".into(),
            retry_after: Some(Duration::from_secs(5)),
        };
        assert!(policy.should_retry(&err));
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(5));
    }

    #[test]
    fn long_rate_limits_are_not_waited_out() {
        let policy = fast_policy(3);
        let err = PersonaError::RateLimited {
            provider: "p".into(),
            retry_after: Some(Duration::from_secs(5)),
        };
        assert!(!policy.should_retry(&err));
    }

    #[test]
    fn validation_failures_are_not_retried() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(&PersonaError::validation("{}", vec![])));
        assert!(!policy.should_retry(&PersonaError::ConnectionFailure {
            provider: "p".into(),
            status: Some(401),
            message: "authentication failed (HTTP 401)".into(),
        }));
    }

    #[tokio::test]
    async fn run_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = fast_policy(3)
            .run("p", |_| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(server_error())
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_stops_at_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<()> = fast_policy(2)
            .run("p", |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(server_error())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_does_not_retry_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<()> = fast_policy(5)
            .run("p", |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(PersonaError::parsing("nope"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
