use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Exponential backoff with a small random jitter so parallel item fetches
/// that fail together don't all come back at the same instant.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Upper bound (exclusive) of the random jitter added to each delay.
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 1,
            max_delay_secs: 60,
            jitter_ms: 500,
        }
    }
}

impl RetryConfig {
    /// A config that never sleeps; used by tests and dry fakes.
    #[cfg(test)]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_secs: 0,
            max_delay_secs: 0,
            jitter_ms: 0,
        }
    }

    /// Delay before retry number `retry` (1-indexed, the first retry is 1).
    ///
    /// `min(base * 2^retry, max) + jitter(0..jitter_ms)`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp_delay = self
            .base_delay_secs
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let capped = exp_delay.min(self.max_delay_secs);
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..self.jitter_ms)
        } else {
            0
        };
        Duration::from_secs(capped) + Duration::from_millis(jitter)
    }
}

/// Retry an async operation with exponential backoff and jitter.
///
/// The classifier decides per error whether another attempt is worthwhile.
/// Returns the first `Ok`, the first non-retryable error, or the last error
/// once `max_retries` retries have been spent.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    classifier: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let mut retry = 0u32;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if classifier(&e) == RetryAction::Abort || retry >= config.max_retries {
                    return Err(e);
                }
                retry += 1;
                let delay = config.delay_for_retry(retry);
                tracing::warn!(
                    "Request failed (attempt {}/{}), retrying in {:.1}s: {}",
                    retry,
                    config.max_retries + 1,
                    delay.as_secs_f64(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_secs, 1);
        assert_eq!(config.jitter_ms, 500);
    }

    #[test]
    fn test_delay_doubles_per_retry() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_secs: 1,
            max_delay_secs: 60,
            jitter_ms: 500,
        };
        // retry 1: 2s + jitter(0..0.5s)
        let d = config.delay_for_retry(1);
        assert!(d >= Duration::from_secs(2) && d < Duration::from_millis(2500));

        // retry 3: 8s + jitter
        let d = config.delay_for_retry(3);
        assert!(d >= Duration::from_secs(8) && d < Duration::from_millis(8500));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig {
            max_retries: 10,
            base_delay_secs: 5,
            max_delay_secs: 30,
            jitter_ms: 0,
        };
        assert_eq!(config.delay_for_retry(10), Duration::from_secs(30));
        // Shift overflow saturates instead of panicking
        assert_eq!(config.delay_for_retry(200), Duration::from_secs(30));
    }

    #[test]
    fn test_immediate_has_no_delay() {
        let config = RetryConfig::immediate(3);
        assert_eq!(config.delay_for_retry(2), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result: Result<i32, String> = retry_with_backoff(
            &RetryConfig::immediate(3),
            |_| RetryAction::Retry,
            || async { Ok(42) },
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_abort_on_non_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let cc = calls.clone();
        let result: Result<i32, String> = retry_with_backoff(
            &RetryConfig::immediate(3),
            |_| RetryAction::Abort,
            || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), "fatal");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let cc = calls.clone();
        let result: Result<i32, String> = retry_with_backoff(
            &RetryConfig::immediate(3),
            |_| RetryAction::Retry,
            || {
                let cc = cc.clone();
                async move {
                    if cc.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(99)
                    }
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let cc = calls.clone();
        let result: Result<i32, String> = retry_with_backoff(
            &RetryConfig::immediate(2),
            |_| RetryAction::Retry,
            || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err("still failing".to_string())
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), "still failing");
        // 1 initial + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
