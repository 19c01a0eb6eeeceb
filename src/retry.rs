//! Retry/backoff policy applied at the external call boundaries

use crate::config::{parse_duration, RetryConfig};
use crate::error::Result;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Errors that can tell whether another attempt might succeed
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Successful result together with the number of retries it took
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

/// Last error seen once the policy gives up
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub error: E,
    pub attempts: u32,
}

/// Exponential backoff with optional jitter
///
/// `delay(n) = min(base * 2^(n-1), max)` for the n-th retry, plus up to one
/// `base` of random jitter (still capped at `max`).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: true,
        }
    }

    /// Constant pause between a fixed number of attempts, no jitter
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, delay, delay).with_jitter(false)
    }

    /// Single attempt
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn from_config(config: &RetryConfig) -> Result<Self> {
        let base = parse_duration(&config.base_delay)?;
        let max = parse_duration(&config.max_delay)?;
        Ok(Self::new(config.max_attempts, base, max).with_jitter(config.jitter))
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause before the `retry`-th retry (1-based)
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if !self.jitter || self.base_delay.is_zero() {
            return backoff;
        }

        let base_ms = self.base_delay.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=base_ms);
        (backoff + Duration::from_millis(jitter)).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        mut op: F,
    ) -> std::result::Result<Retried<T>, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        retries: attempt - 1,
                    })
                }
                Err(error) => {
                    if !error.is_transient() || attempt >= self.max_attempts {
                        return Err(RetryExhausted {
                            error,
                            attempts: attempt,
                        });
                    }

                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation, attempt, self.max_attempts, error, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(transient={})", self.0)
        }
    }

    impl Retryable for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(60))
            .with_jitter(false);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1));
        for _ in 0..50 {
            let d = policy.delay_for_attempt(2);
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_millis(300));
        }
        assert_eq!(policy.delay_for_attempt(12), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));

        let result = policy
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Flaky(true))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, 42);
        assert_eq!(result.retries, 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));

        let err = policy
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Flaky(false)) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        let err = policy
            .run("test", || async { Err::<(), _>(Flaky(true)) })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
    }
}
