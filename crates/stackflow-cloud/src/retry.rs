//! Retry with exponential backoff for provider calls

use crate::error::{CloudError, Result};
use crate::provider::RetryConfig;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Settings shared by every provider call in one run
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub retry: RetryConfig,

    /// Upper bound for a single attempt
    pub timeout: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Run `call` until it succeeds, fails permanently or attempts run out
///
/// Each attempt is bounded by `policy.timeout`; an expired attempt counts as
/// `ProviderUnavailable`. Only transient errors are retried. Cancellation
/// stops further attempts and returns the last error.
pub async fn with_retry<T, F, Fut>(
    policy: &CallPolicy,
    cancel: &CancellationToken,
    calls: &AtomicUsize,
    operation: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.retry.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        calls.fetch_add(1, Ordering::SeqCst);
        let outcome = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(CloudError::ProviderUnavailable(format!(
                "{} timed out after {}s",
                operation,
                policy.timeout.as_secs_f64()
            ))),
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !error.is_transient() || attempt >= max_attempts {
            return Err(error);
        }

        let delay = policy.retry.delay_for(attempt);
        tracing::warn!(
            operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Transient failure, retrying: {}",
            error
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(error),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    fn fast_policy(max_attempts: u32) -> CallPolicy {
        CallPolicy {
            retry: RetryConfig {
                max_attempts,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                backoff_multiplier: 2.0,
            },
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = AtomicUsize::new(0);
        let failures = Arc::new(AtomicU32::new(2));

        let result = with_retry(&fast_policy(5), &CancellationToken::new(), &calls, "create", || {
            let failures = failures.clone();
            async move {
                if failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                    Err(CloudError::ProviderThrottled("slow down".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> =
            with_retry(&fast_policy(5), &CancellationToken::new(), &calls, "create", || async {
                Err(CloudError::ProviderRejected("invalid".into()))
            })
            .await;

        assert!(matches!(result, Err(CloudError::ProviderRejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> =
            with_retry(&fast_policy(3), &CancellationToken::new(), &calls, "update", || async {
                Err(CloudError::ProviderUnavailable("down".into()))
            })
            .await;

        assert!(matches!(result, Err(CloudError::ProviderUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_becomes_unavailable() {
        let calls = AtomicUsize::new(0);
        let mut policy = fast_policy(1);
        policy.timeout = Duration::from_millis(10);

        let result: Result<()> =
            with_retry(&policy, &CancellationToken::new(), &calls, "delete", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CloudError::ProviderUnavailable(_))));
    }

    #[tokio::test]
    async fn test_cancel_stops_retrying() {
        let calls = AtomicUsize::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut policy = fast_policy(5);
        policy.retry.initial_delay = Duration::from_secs(10);

        let result: Result<()> = with_retry(&policy, &cancel, &calls, "create", || async {
            Err(CloudError::ProviderThrottled("busy".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
