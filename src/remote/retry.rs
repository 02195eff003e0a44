use std::{future::Future, time::Duration};

use super::RemoteError;

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, first one included. Zero behaves like one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Exponential backoff: `base`, `2 * base`, `4 * base`, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Runs `op` until it succeeds, fails permanently, or the policy runs out.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if attempts >= max_attempts => {
                log_error!("{label} failed after {attempts} attempt(s): {err}");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for(attempts);
                log_warn!(
                    "{label} attempt {attempts}/{max_attempts} failed: {err}. Retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = with_retry(RetryPolicy::default(), "detect", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RemoteError::ServerStatus { status: 502 })
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_stop_immediately() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), _> = with_retry(RetryPolicy::default(), "detect", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::QuotaExhausted {
                message: "limit".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(RemoteError::QuotaExhausted { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: Result<(), _> = with_retry(RetryPolicy::new(2, Duration::from_secs(1)), "detect", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Timeout)
        })
        .await;

        assert!(matches!(result, Err(RemoteError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
