use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::MigrationError;

/// Bounded retry around a single remote operation.
///
/// The wait between attempts is `delay` plus a uniformly random share of
/// `jitter`. The last error is returned once attempts run out. Errors that
/// another attempt cannot fix (mapping misses, not-found, conflicts) are
/// returned immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(3),
            jitter: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Retry without waiting between attempts.
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    fn pause(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.delay;
        }
        self.delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, MigrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MigrationError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let pause = self.pause();
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        error = %err,
                        "operation failed, retrying in {:.1}s",
                        pause.as_secs_f64()
                    );
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3);

        let result = policy
            .run("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(TrackerError::Transient("503".into()).into())
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_with_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3);

        let result: Result<(), _> = policy
            .run("always failing", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(TrackerError::Transient(format!("attempt {n}")).into())
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.unwrap_err().to_string().contains("attempt 3"));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3);

        let result: Result<(), _> = policy
            .run("translate", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(MigrationError::UnmappedValue {
                    table: "statuses",
                    key: "limbo".into(),
                })
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(MigrationError::UnmappedValue { .. })));
    }

    #[test]
    fn pause_stays_within_jitter_bounds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(100),
            jitter: Duration::from_millis(50),
        };
        for _ in 0..20 {
            let pause = policy.pause();
            assert!(pause >= Duration::from_millis(100));
            assert!(pause <= Duration::from_millis(150));
        }
    }
}
