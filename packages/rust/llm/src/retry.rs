//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::GenerateError;

/// Longest single wait between attempts.
const MAX_DELAY: Duration = Duration::from_secs(30);

/// How many times to try a call, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first; at least one is always made.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before attempt `attempt + 1`, doubling from the base.
    pub fn delay_after(&self, attempt: u32, err: &GenerateError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1 << exponent).min(MAX_DELAY);
        match err {
            GenerateError::RateLimited {
                retry_after: Some(wait),
            } => backoff.max(*wait).min(MAX_DELAY),
            _ => backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// The outcome of a retried operation and how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub outcome: Result<T, GenerateError>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
/// `op` receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Attempted<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GenerateError>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                return Attempted {
                    outcome: Ok(value),
                    attempts: attempt,
                };
            }
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt, &err);
                warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "transient failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                debug!(attempt, error = %err, "giving up");
                return Attempted {
                    outcome: Err(err),
                    attempts: attempt,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast(3), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GenerateError::Server {
                        status: 502,
                        message: "bad gateway".into(),
                    })
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.outcome, Ok("done"));
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn stops_on_permanent_failure() {
        let calls = AtomicU32::new(0);
        let result: Attempted<()> = with_retry(&fast(5), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GenerateError::Auth { status: 401 }) }
        })
        .await;
        assert!(matches!(result.outcome, Err(GenerateError::Auth { .. })));
        assert_eq!(result.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let result: Attempted<()> =
            with_retry(&fast(2), |_| async { Err(GenerateError::Empty) }).await;
        assert_eq!(result.outcome, Err(GenerateError::Empty));
        assert_eq!(result.attempts, 2);
    }

    #[test]
    fn backoff_doubles_and_honours_retry_after() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        let err = GenerateError::Timeout(Duration::from_secs(1));
        assert_eq!(policy.delay_after(1, &err), Duration::from_millis(100));
        assert_eq!(policy.delay_after(3, &err), Duration::from_millis(400));

        let limited = GenerateError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(policy.delay_after(1, &limited), Duration::from_secs(2));
        assert_eq!(policy.delay_after(40, &err), MAX_DELAY);
    }
}
