use crate::config::PlatformConfig;
use crate::error::BridgeResult;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded retry for `Transient` and `RateLimited` failures.
///
/// Waits exactly `retry_after` when the platform supplied one, otherwise
/// doubles `base_backoff` per attempt up to `max_backoff`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PlatformConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_secs(config.max_backoff_seconds),
        }
    }

    fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(1u32 << (attempt - 1).min(16));
        retry_after.unwrap_or_else(|| exp.min(self.max_backoff))
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> BridgeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BridgeResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.kind.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay(attempt, e.retry_after);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        kind = %e.kind,
                        delay_ms = delay.as_millis() as u64,
                        "Platform call failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(operation, attempt, kind = %e.kind, "Platform call failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BridgeError, ErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_delay_backoff_and_cap() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(p.delay(1, None), Duration::from_millis(100));
        assert_eq!(p.delay(2, None), Duration::from_millis(200));
        assert_eq!(p.delay(3, None), Duration::from_millis(350));
        assert_eq!(
            p.delay(1, Some(Duration::from_millis(250))),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_retry_after_not_shortened_by_backoff_cap() {
        let p = RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        };
        assert_eq!(p.delay(1, Some(Duration::from_secs(60))), Duration::from_secs(60));
        assert_eq!(p.delay(2, Some(Duration::from_secs(45))), Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_transient_retried_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy()
            .run("op", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BridgeError::transient("502"))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = policy()
            .run("op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(BridgeError::rate_limited(
                    Some(Duration::from_millis(1)),
                    "ratelimited",
                ))
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_not_retried() {
        for kind in [
            ErrorKind::AuthRejected,
            ErrorKind::InvalidArgument,
            ErrorKind::Internal,
        ] {
            let calls = AtomicU32::new(0);
            let counter = &calls;
            let err = policy()
                .run("op", move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(BridgeError::new(kind, "nope"))
                })
                .await
                .unwrap_err();
            assert_eq!(err.kind, kind);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
    }
}
