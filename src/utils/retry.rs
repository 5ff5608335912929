use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Fixed-delay retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Runs `op` until it succeeds, fails with an error `is_retryable` rejects, or
/// `policy.max_attempts` attempts have been made. `op` receives the 1-based
/// attempt number. The delay is a tokio sleep and never blocks the runtime.
pub async fn retry<T, E, F, Fut, R>(policy: RetryPolicy, is_retryable: R, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                tracing::debug!(
                    "Attempt {}/{} failed, retrying in {:?}: {}",
                    attempt,
                    max_attempts,
                    policy.delay,
                    e
                );
                sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failing_until(succeed_on: u32, calls: &AtomicU32) -> impl FnMut(u32) -> std::future::Ready<Result<u32, String>> + '_ {
        move |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            if attempt >= succeed_on {
                std::future::ready(Ok(attempt))
            } else {
                std::future::ready(Err(format!("busy on attempt {attempt}")))
            }
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_last_attempt() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(20, Duration::ZERO);

        let result = retry(policy, |_| true, failing_until(20, &calls)).await;

        assert_eq!(result, Ok(20));
        assert_eq!(calls.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(20, Duration::ZERO);

        let result = retry(policy, |_| true, failing_until(u32::MAX, &calls)).await;

        assert_eq!(result, Err("busy on attempt 20".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(5, Duration::ZERO);

        let result = retry(policy, |_| false, failing_until(3, &calls)).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_applied_between_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_secs(2));
        let started = tokio::time::Instant::now();

        let result = retry(policy, |_| true, failing_until(3, &calls)).await;

        assert_eq!(result, Ok(3));
        assert!(started.elapsed() >= Duration::from_secs(4));
    }
}
