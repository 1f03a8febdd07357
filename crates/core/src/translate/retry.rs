//! Backoff-and-retry wrapper for backend calls.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::backend::TranslationError;

/// Exponential backoff policy for transient backend errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 20,
            base_delay: Duration::from_secs(120),
            multiplier: 1.0,
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

/// Terminal outcome of a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// The cancellation token fired while waiting or between attempts.
    #[error("operation cancelled")]
    Cancelled,

    /// A non-retryable error, or the retry cap was exhausted; the last
    /// backend error is carried.
    #[error(transparent)]
    Backend(TranslationError),
}

/// Run `op` until it succeeds, its error stops being retryable, or the retry
/// cap is hit. A `RateLimited` hint from the provider overrides the computed
/// backoff delay. Cancellation is observed between attempts and during
/// sleeps.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, TranslationError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = match &e {
                    TranslationError::RateLimited {
                        retry_after: Some(hint),
                    } => (*hint).min(policy.max_delay),
                    _ => policy.delay_for(attempt),
                };
                warn!(
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs_f64(),
                    "transient backend error, backing off: {}",
                    e
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => {
                debug!("backend error is terminal after {} attempts: {}", attempt + 1, e);
                return Err(RetryError::Backend(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(5),
            multiplier: 2.0,
            max_delay: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(&fast_policy(5), &CancellationToken::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TranslationError::ServiceFailure("boom".to_string()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(&fast_policy(5), &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TranslationError::NonRetryable("401".to_string())) }
        })
        .await;
        assert!(matches!(
            result,
            Err(RetryError::Backend(TranslationError::NonRetryable(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_cap_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(&fast_policy(2), &CancellationToken::new(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TranslationError::ServiceFailure("503".to_string())) }
        })
        .await;
        assert!(matches!(
            result,
            Err(RetryError::Backend(TranslationError::ServiceFailure(_)))
        ));
        // Initial attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = with_backoff(&fast_policy(5), &cancel, || async {
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[tokio::test]
    async fn test_rate_limit_hint_is_honored() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result = with_backoff(&fast_policy(3), &CancellationToken::new(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(TranslationError::RateLimited {
                        retry_after: Some(Duration::from_millis(30)),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_delay_growth_and_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350));
    }
}
