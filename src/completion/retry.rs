//! Retry wrapper with exponential backoff

use super::types::{BackendError, BackendExecutor, BackendRequest, BackendResponse, RetryPolicy};
use async_trait::async_trait;

/// Adds retries for transient errors to any backend
pub struct RetryExecutor<T: BackendExecutor> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: BackendExecutor> RetryExecutor<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<T: BackendExecutor> BackendExecutor for RetryExecutor<T> {
    async fn execute(&self, request: &BackendRequest) -> Result<BackendResponse, BackendError> {
        let mut attempt = 0;
        loop {
            let error = match self.inner.execute(request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= self.policy.max_retries {
                return Err(error);
            }

            let delay = self.policy.delay_after(&error, attempt);
            tracing::warn!(
                backend = %self.inner.name(),
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying completion request"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }
}

/// Wrap `backend` with `policy`
pub fn with_retry<T: BackendExecutor>(backend: T, policy: RetryPolicy) -> RetryExecutor<T> {
    RetryExecutor::new(backend, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails a fixed number of times before succeeding
    struct FlakyBackend {
        calls: AtomicU32,
        fail_times: u32,
        error: BackendError,
    }

    impl FlakyBackend {
        fn new(fail_times: u32, error: BackendError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_times,
                error,
            }
        }
    }

    #[async_trait]
    impl BackendExecutor for FlakyBackend {
        async fn execute(&self, _request: &BackendRequest) -> Result<BackendResponse, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(self.error.clone())
            } else {
                Ok(BackendResponse::new("ok", "flaky", Duration::from_millis(1)))
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let executor = with_retry(
            FlakyBackend::new(2, BackendError::network("reset")),
            fast_policy(3),
        );
        let response = executor.execute(&BackendRequest::new("test")).await.unwrap();
        assert_eq!(response.text, "ok");
        assert_eq!(executor.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let executor = with_retry(FlakyBackend::new(10, BackendError::rate_limit(None)), fast_policy(2));
        let err = executor.execute(&BackendRequest::new("test")).await.unwrap_err();
        assert!(matches!(err, BackendError::RateLimit { .. }));
        assert_eq!(executor.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_on_permanent_error() {
        let executor = with_retry(FlakyBackend::new(10, BackendError::auth("bad key")), fast_policy(5));
        let err = executor.execute(&BackendRequest::new("test")).await.unwrap_err();
        assert!(matches!(err, BackendError::Auth { .. }));
        assert_eq!(executor.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_retry_after_is_honoured() {
        let executor = with_retry(
            FlakyBackend::new(1, BackendError::rate_limit(Some(Duration::from_millis(5)))),
            fast_policy(1),
        );
        assert!(executor.execute(&BackendRequest::new("test")).await.is_ok());
        assert_eq!(executor.name(), "flaky");
    }

    #[test]
    fn test_server_retry_after_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(20),
            ..fast_policy(1)
        };
        let hours = BackendError::rate_limit(Some(Duration::from_secs(7200)));
        assert_eq!(policy.delay_after(&hours, 0), Duration::from_millis(20));

        let short = BackendError::rate_limit(Some(Duration::from_millis(5)));
        assert_eq!(policy.delay_after(&short, 0), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_long_retry_after_does_not_stall() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(1),
            ..fast_policy(1)
        };
        let executor = with_retry(
            FlakyBackend::new(1, BackendError::rate_limit(Some(Duration::from_secs(3600)))),
            policy,
        );
        let response = tokio::time::timeout(
            Duration::from_secs(5),
            executor.execute(&BackendRequest::new("test")),
        )
        .await
        .expect("retry waited for the full Retry-After")
        .unwrap();
        assert_eq!(response.text, "ok");
    }
}
