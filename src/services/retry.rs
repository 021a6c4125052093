// src/services/retry.rs
use crate::config::ServiceConfig;
use crate::errors::{RegionEditError, Result};
use crate::services::{EditRequest, EditService};
use async_trait::async_trait;
use bytes::Bytes;
use log::warn;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Adds a per-attempt timeout and bounded retry with exponential backoff to
/// any edit service. Cancellation is never retried.
pub struct RetryingEditService<S> {
    inner: S,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl<S: EditService> RetryingEditService<S> {
    pub fn new(inner: S, timeout: Duration, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            timeout,
            max_retries,
            backoff,
        }
    }

    pub fn from_config(inner: S, config: &ServiceConfig) -> Self {
        Self::new(
            inner,
            config.timeout,
            config.max_retries,
            config.retry_backoff,
        )
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[async_trait]
impl<S: EditService> EditService for RetryingEditService<S> {
    async fn edit(&self, request: &EditRequest, cancel: &CancellationToken) -> Result<Bytes> {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(RegionEditError::Cancelled);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(RegionEditError::Cancelled),
                result = tokio::time::timeout(self.timeout, self.inner.edit(request, cancel)) => {
                    result.unwrap_or(Err(RegionEditError::Timeout(self.timeout)))
                }
            };

            match outcome {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        "Edit attempt {} failed ({}); retrying in {} ms",
                        attempt,
                        e,
                        delay.as_millis()
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RegionEditError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn ensure_configured(&self) -> Result<()> {
        self.inner.ensure_configured()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        hang: Duration,
    }

    #[async_trait]
    impl EditService for Flaky {
        async fn edit(&self, _: &EditRequest, _: &CancellationToken) -> Result<Bytes> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.hang).await;
            if n < self.failures {
                Err(RegionEditError::Service("boom".to_string()))
            } else {
                Ok(Bytes::from_static(b"ok"))
            }
        }
    }

    fn flaky(failures: u32, hang: Duration) -> Flaky {
        Flaky {
            failures,
            calls: AtomicU32::new(0),
            hang,
        }
    }

    fn request() -> EditRequest {
        EditRequest {
            image: Bytes::new(),
            prompt: "p".to_string(),
            model: None,
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let service = RetryingEditService::new(
            flaky(2, Duration::ZERO),
            Duration::from_secs(1),
            2,
            Duration::from_millis(1),
        );
        let out = service.edit(&request(), &CancellationToken::new()).await.unwrap();
        assert_eq!(&out[..], b"ok");
        assert_eq!(service.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let service = RetryingEditService::new(
            flaky(10, Duration::ZERO),
            Duration::from_secs(1),
            1,
            Duration::from_millis(1),
        );
        let err = service.edit(&request(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RegionEditError::Service(_)));
        assert_eq!(service.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_attempts_time_out() {
        let service = RetryingEditService::new(
            flaky(0, Duration::from_millis(200)),
            Duration::from_millis(5),
            1,
            Duration::from_millis(1),
        );
        let err = service.edit(&request(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RegionEditError::Timeout(_)));
        assert_eq!(service.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_is_not_retried() {
        let service = RetryingEditService::new(
            flaky(0, Duration::from_millis(200)),
            Duration::from_secs(1),
            3,
            Duration::from_millis(1),
        );
        let token = CancellationToken::new();
        let request = request();
        let call = service.edit(&request, &token);
        token.cancel();
        assert!(call.await.unwrap_err().is_cancellation());
        assert!(service.inner.calls.load(Ordering::SeqCst) <= 1);
    }
}
