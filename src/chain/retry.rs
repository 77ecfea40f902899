use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::AppResult;

/// Capped exponential backoff for chain calls
///
/// Every error is treated as retryable. After `max_attempts` consecutive
/// failures the last error is returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failure; doubled after each further failure
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const CALL_MAX_ATTEMPTS: u32 = 10;
    pub const LOG_FETCH_MAX_ATTEMPTS: u32 = 6;

    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Budget for single contract reads and writes
    pub fn calls() -> Self {
        Self::new(
            Self::CALL_MAX_ATTEMPTS,
            Duration::from_secs(1),
            Duration::from_secs(256),
        )
    }

    /// Budget for `getLogs` batches
    pub fn log_fetch() -> Self {
        Self::new(
            Self::LOG_FETCH_MAX_ATTEMPTS,
            Duration::from_secs(1),
            Duration::from_secs(256),
        )
    }

    /// Delay to wait after the given (zero-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::calls()
    }
}

/// Run `operation` until it succeeds or the policy is exhausted.
///
/// The backoff sleep is a tokio timer local to this call, so concurrent
/// retries never hold each other up.
pub async fn retry_call<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    warn!("Max attempts ({}) exhausted for {}: {}", policy.max_attempts, label, e);
                    return Err(e);
                }
                let delay = policy.delay_for_attempt(attempt - 1);
                warn!(
                    "Retryable error in {} (attempt {}/{}), retrying in {:?}: {}",
                    label, attempt, policy.max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, RpcError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn flaky(calls: &AtomicU32, failures: u32) -> AppResult<u32> {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= failures {
            Err(RpcError::Transport(format!("timeout #{}", call)).into())
        } else {
            Ok(call)
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::calls();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(8), Duration::from_secs(256));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_secs(256));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(256));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::calls();

        let result = retry_call(&policy, "balanceOf", || async { flaky(&calls, 3) }).await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::log_fetch();

        let result = retry_call(&policy, "getLogs", || async { flaky(&calls, u32::MAX) }).await;

        assert_eq!(calls.load(Ordering::SeqCst), RetryPolicy::LOG_FETCH_MAX_ATTEMPTS);
        match result {
            Err(AppError::Rpc(RpcError::Transport(message))) => assert_eq!(message, "timeout #6"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy_does_not_sleep() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(1, Duration::from_secs(1), Duration::from_secs(256));
        let started = tokio::time::Instant::now();

        assert!(retry_call(&policy, "call", || async { flaky(&calls, 1) }).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
