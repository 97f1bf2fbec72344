use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Configuration for retry behavior with exponential backoff.
///
/// Defines how many times to retry an operation and how long to wait
/// between attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_attempts: u32,

    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,

    /// Multiplier applied to backoff after each retry
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
            backoff_multiplier,
        }
    }

    /// Returns a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Returns a policy for quick transient failures.
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            backoff_multiplier: 2.0,
        }
    }

    /// Three attempts with a 1 second initial backoff, suited to remote stores.
    pub fn network() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 8000,
            backoff_multiplier: 2.0,
        }
    }

    /// Calculates the backoff duration for a given attempt number (0-indexed).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32))
        .min(self.max_backoff_ms as f64) as u64;
        Duration::from_millis(backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::network()
    }
}

/// Retries an async operation according to the specified policy.
///
/// Only retries if the error is retryable (as determined by `Error::is_retryable()`).
///
/// # Examples
///
/// ```no_run
/// use histsync_core::retry::{retry_with_policy, RetryPolicy};
/// use histsync_core::{Error, Result};
///
/// async fn flaky() -> Result<String> {
///     Err(Error::RemoteConnection("timeout".to_string()))
/// }
///
/// # async fn run() {
/// let policy = RetryPolicy::fast();
/// let result = retry_with_policy(&policy, || flaky()).await;
/// assert!(result.is_err());
/// # }
/// ```
pub async fn retry_with_policy<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = match operation().await {
        Ok(result) => return Ok(result),
        Err(e) if !e.is_retryable() => return Err(e),
        Err(e) => e,
    };

    for attempt in 0..policy.max_attempts {
        let backoff = policy.backoff_duration(attempt);
        tracing::debug!(attempt = attempt + 1, ?backoff, error = %last_error, "retrying");
        tokio::time::sleep(backoff).await;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => last_error = e,
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy::new(5, 100, 1000, 2.0);

        assert_eq!(policy.backoff_duration(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_duration(3), Duration::from_millis(800));
        assert_eq!(policy.backoff_duration(4), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::fast();

        let counter = attempts.clone();
        let result = retry_with_policy(&policy, || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(Error::RemoteConnection("reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<()> = retry_with_policy(&RetryPolicy::fast(), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::RemoteAuth("401".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::RemoteAuth(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<()> = retry_with_policy(&RetryPolicy::fast(), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::RemoteConnection("down".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
