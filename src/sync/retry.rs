//! Bounded retries for gateway calls.

use std::future::Future;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::error::GatewayError;
use crate::gateway::GatewayId;

/// Timeout and backoff settings for one gateway call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Applied to each attempt separately.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            timeout: config.request_timeout(),
        }
    }

    /// No waiting between attempts. Useful in tests.
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
            timeout: Duration::from_secs(10),
        }
    }

    /// Delay before retry number `attempt` (0-based). A gateway-supplied
    /// `Retry-After` wins when longer, but never beyond `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32, error: &GatewayError) -> Duration {
        let backoff = calculate_backoff_delay(attempt, self.base_delay_ms, self.max_delay_ms);
        match error {
            GatewayError::RateLimited {
                retry_after: Some(hint),
                ..
            } => backoff.max((*hint).min(Duration::from_millis(self.max_delay_ms))),
            _ => backoff,
        }
    }
}

/// A successful call and how many retries it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

/// Run `operation_fn` with a per-attempt timeout, retrying only errors that
/// [`GatewayError::is_retryable`] accepts. A timeout counts as unavailable.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    gateway: GatewayId,
    operation: &str,
    operation_fn: F,
) -> Result<Retried<T>, GatewayError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempts = 0;

    loop {
        let error = match tokio::time::timeout(policy.timeout, operation_fn()).await {
            Ok(Ok(value)) => {
                return Ok(Retried {
                    value,
                    retries: attempts,
                });
            }
            Ok(Err(e)) => e,
            Err(_timeout) => GatewayError::unavailable(
                gateway,
                format!("request timed out after {}s", policy.timeout.as_secs()),
            ),
        };

        if !error.is_retryable() || attempts >= policy.max_retries {
            return Err(error);
        }

        let delay = policy.delay_for(attempts, &error);
        tracing::warn!(
            target: "gatesync::sync",
            gateway = %gateway,
            operation = operation,
            attempt = attempts + 1,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying gateway call after transient error"
        );
        tokio::time::sleep(delay).await;
        attempts += 1;
    }
}

/// Calculate backoff delay with exponential backoff and jitter.
#[inline]
pub fn calculate_backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    // Exponential backoff: base_ms * 2^attempt
    let delay_ms = base_ms.saturating_mul(2_u64.saturating_pow(attempt));
    let delay_ms = delay_ms.min(max_ms);

    // Add jitter (0-25% of delay)
    let jitter = if delay_ms > 0 {
        fastrand::u64(0..=delay_ms / 4)
    } else {
        0
    };
    Duration::from_millis(delay_ms.saturating_add(jitter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_grows_and_caps() {
        let first = calculate_backoff_delay(0, 500, 30_000);
        assert!(first >= Duration::from_millis(500) && first <= Duration::from_millis(625));

        let third = calculate_backoff_delay(2, 500, 30_000);
        assert!(third >= Duration::from_millis(2_000) && third <= Duration::from_millis(2_500));

        let capped = calculate_backoff_delay(20, 500, 30_000);
        assert!(capped >= Duration::from_millis(30_000) && capped <= Duration::from_millis(37_500));

        assert_eq!(calculate_backoff_delay(5, 0, 0), Duration::ZERO);
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            timeout: Duration::from_secs(1),
        };
        let err = GatewayError::RateLimited {
            gateway: GatewayId::Asaas,
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retry(&RetryPolicy::immediate(3), GatewayId::PagBank, "fetch", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(GatewayError::unavailable(GatewayId::PagBank, "502"))
                } else {
                    Ok("page")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, "page");
        assert_eq!(result.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = with_retry(&RetryPolicy::immediate(3), GatewayId::Asaas, "fetch", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(GatewayError::Auth {
                    gateway: GatewayId::Asaas,
                    http_status: 401,
                })
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, GatewayError::Auth { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let err = with_retry(&RetryPolicy::immediate(2), GatewayId::Pagarme, "fetch", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(GatewayError::unavailable(GatewayId::Pagarme, "503"))
            }
        })
        .await
        .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_unavailable() {
        let policy = RetryPolicy {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
            timeout: Duration::from_secs(10),
        };
        let err = with_retry(&policy, GatewayId::MercadoPago, "fetch", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, GatewayError>(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, GatewayError::Unavailable { .. }));
    }
}
