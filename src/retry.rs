//! Capped exponential-backoff retry for whole-batch remote calls.

use std::future::Future;
use std::time::Duration;

use crate::error::ConfigError;

/// Retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one (0 = single attempt)
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_delay_ms: 500,
            max_retry_delay_ms: 4000,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_delay_ms == 0 {
            return Err(ConfigError::InvalidRetryDelay);
        }
        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err(ConfigError::InvalidMaxRetryDelay {
                delay_ms: self.retry_delay_ms,
                max_ms: self.max_retry_delay_ms,
            });
        }
        Ok(())
    }

    /// Delay before retry number `retry` (1-based): doubles from
    /// `retry_delay_ms`, capped at `max_retry_delay_ms`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let delay = self
            .retry_delay_ms
            .saturating_mul(factor)
            .min(self.max_retry_delay_ms);
        Duration::from_millis(delay)
    }
}

enum RetryState<T, E> {
    Attempting { attempt: u32 },
    Waiting { attempt: u32, delay: Duration },
    Succeeded(T),
    Exhausted(E),
}

/// Run `operation` until it succeeds or the policy runs out of retries.
///
/// The last error is returned once every attempt has failed.
pub async fn fetch_with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut state = RetryState::Attempting { attempt: 0 };

    loop {
        state = match state {
            RetryState::Attempting { attempt } => match operation().await {
                Ok(value) => RetryState::Succeeded(value),
                Err(e) if attempt >= policy.retries => RetryState::Exhausted(e),
                Err(e) => {
                    let delay = policy.delay_for(attempt + 1);
                    tracing::debug!(
                        attempt = attempt + 1,
                        retries = policy.retries,
                        delay_ms = delay.as_millis() as u64,
                        "batch attempt failed, retrying: {}",
                        e
                    );
                    RetryState::Waiting {
                        attempt: attempt + 1,
                        delay,
                    }
                }
            },
            RetryState::Waiting { attempt, delay } => {
                tokio::time::sleep(delay).await;
                RetryState::Attempting { attempt }
            }
            RetryState::Succeeded(value) => return Ok(value),
            RetryState::Exhausted(e) => return Err(e),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            retry_delay_ms: 1,
            max_retry_delay_ms: 2,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            retries: 10,
            retry_delay_ms: 500,
            max_retry_delay_ms: 4000,
        };
        let delays: Vec<u64> = (1..=6).map(|n| policy.delay_for(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 4000, 4000]);
    }

    #[test]
    fn test_backoff_huge_retry_count_saturates() {
        let policy = RetryPolicy {
            retries: 200,
            retry_delay_ms: 3,
            max_retry_delay_ms: 10,
        };
        assert_eq!(policy.delay_for(150), Duration::from_millis(10));
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());

        let zero = RetryPolicy { retry_delay_ms: 0, ..RetryPolicy::default() };
        assert_eq!(zero.validate(), Err(ConfigError::InvalidRetryDelay));

        let inverted = RetryPolicy {
            retries: 1,
            retry_delay_ms: 100,
            max_retry_delay_ms: 50,
        };
        assert_eq!(
            inverted.validate(),
            Err(ConfigError::InvalidMaxRetryDelay { delay_ms: 100, max_ms: 50 })
        );
    }

    #[tokio::test]
    async fn test_zero_retries_is_single_attempt() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), String> = fetch_with_retry(&fast_policy(0), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        })
        .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let calls = &AtomicU32::new(0);
        let result: Result<u32, String> = fetch_with_retry(&fast_policy(3), || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(format!("failure {}", n))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), String> = fetch_with_retry(&fast_policy(2), || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("failure {}", n))
        })
        .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
