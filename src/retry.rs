use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Bounded exponential backoff. Attempt `i` (0-based) that fails is followed
/// by a wait of `base_delay * 2^i`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` attempts have
/// failed, returning the last error in that case.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation = label,
                    error = %e,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    operation = label,
                    error = %e,
                    attempts = max_attempts,
                    "Giving up after all retries"
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_operation_runs_max_attempts() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let result: Result<(), String> = with_retry(&policy, "always-fails", || {
            let calls = calls.clone();
            async move {
                calls.lock().unwrap().push(Instant::now());
                Err("boom".to_string())
            }
        })
        .await;

        assert_eq!(result, Err("boom".to_string()));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4);

        // Gap before retry i is at least base * 2^i
        for i in 1..calls.len() {
            let gap = calls[i] - calls[i - 1];
            let expected = Duration::from_millis(100) * 2u32.pow(i as u32 - 1);
            assert!(gap >= expected, "retry {} waited {:?}, expected >= {:?}", i, gap, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_is_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(Mutex::new(0));

        let result: Result<&str, String> = with_retry(&policy, "succeeds", || {
            let calls = calls.clone();
            async move {
                *calls.lock().unwrap() += 1;
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let calls = Arc::new(Mutex::new(0));

        let result: Result<u32, String> = with_retry(&policy, "flaky", || {
            let calls = calls.clone();
            async move {
                let mut n = calls.lock().unwrap();
                *n += 1;
                if *n < 3 { Err(format!("fail {}", n)) } else { Ok(*n) }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1000));
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_zero_attempts_is_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        assert_eq!(policy.max_attempts, 1);
    }
}
