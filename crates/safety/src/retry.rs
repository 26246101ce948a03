//! Exponential-backoff retry for transient remote failures.
//!
//! Only errors classified as [`ErrorKind::Transient`] are retried.
//! Permanent failures return after the first attempt. A rate-limit
//! response carrying `Retry-After` replaces the computed backoff for that
//! wait, clamped to [`RetryConfig::max_delay`].

use std::future::Future;
use std::time::Duration;

use km_core::config::RetryConfig;
use km_core::{ApiError, ErrorKind};

/// Backoff parameters applied to each bulk item.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, ApiError>,
    /// Number of attempts made, at least 1.
    pub attempts: u32,
}

impl<T> Attempted<T> {
    /// Whether the last failure was transient, meaning attempts ran out.
    pub fn exhausted(&self) -> bool {
        matches!(&self.result, Err(e) if e.is_transient())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(RetryConfig {
            max_attempts: 1,
            ..Default::default()
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Backoff after `current`, clamped to the configured maximum.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.config.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.config.max_delay)
    }

    /// Wait before the next attempt after `error`, given the backoff delay
    /// that would otherwise apply.
    pub fn wait_for(&self, error: &ApiError, backoff: Duration) -> Duration {
        match error {
            ApiError::RateLimited {
                retry_after: Some(after),
            } => (*after).min(self.config.max_delay),
            _ => backoff,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `label` identifies the work in log output.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let max_attempts = self.max_attempts();
        let mut delay = self.config.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(label, attempt, "Succeeded after retry");
                    }
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(e) => e,
            };

            if error.kind() == ErrorKind::Permanent {
                tracing::debug!(label, attempt, error = %error, "Permanent failure, not retrying");
                return Attempted {
                    result: Err(error),
                    attempts: attempt,
                };
            }

            if attempt >= max_attempts {
                tracing::error!(
                    label,
                    attempts = attempt,
                    error = %error,
                    "Transient failure persisted, giving up",
                );
                return Attempted {
                    result: Err(error),
                    attempts: attempt,
                };
            }

            let wait = self.wait_for(&error, delay);
            tracing::warn!(
                label,
                attempt,
                delay_ms = wait.as_millis() as u64,
                error = %error,
                "Transient failure, retrying",
            );
            tokio::time::sleep(wait).await;
            delay = self.next_delay(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;
    use tokio::time::Instant;

    use super::*;

    fn server_error() -> ApiError {
        ApiError::Server {
            status: 503,
            message: "unavailable".into(),
        }
    }

    #[test]
    fn backoff_sequence_clamps() {
        let policy = RetryPolicy::default();
        let mut delay = Duration::from_millis(500);
        let mut seen = vec![delay.as_millis()];
        for _ in 0..6 {
            delay = policy.next_delay(delay);
            seen.push(delay.as_millis());
        }
        assert_eq!(seen, [500, 1000, 2000, 4000, 8000, 8000, 8000]);
    }

    #[test]
    fn retry_after_overrides_and_clamps() {
        let policy = RetryPolicy::default();
        let backoff = Duration::from_millis(500);

        let short = ApiError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(policy.wait_for(&short, backoff), Duration::from_secs(2));

        let long = ApiError::RateLimited {
            retry_after: Some(Duration::from_secs(120)),
        };
        assert_eq!(policy.wait_for(&long, backoff), Duration::from_secs(8));

        let bare = ApiError::RateLimited { retry_after: None };
        assert_eq!(policy.wait_for(&bare, backoff), backoff);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success() {
        let calls = &AtomicU32::new(0);
        let started = Instant::now();

        let outcome = RetryPolicy::default()
            .run("item", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(server_error())
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_matches!(outcome.result, Ok(7));
        assert_eq!(outcome.attempts, 3);
        // 500ms + 1000ms of backoff.
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_is_not_retried() {
        let calls = &AtomicU32::new(0);

        let outcome: Attempted<()> = RetryPolicy::default()
            .run("item", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::Validation("bad field".into()))
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!outcome.exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);

        let outcome: Attempted<()> = RetryPolicy::default()
            .run("item", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::Timeout(Duration::from_secs(30)))
            })
            .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(outcome.exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn none_policy_runs_once() {
        let outcome: Attempted<()> = RetryPolicy::none()
            .run("item", move || async move { Err(server_error()) })
            .await;
        assert_eq!(outcome.attempts, 1);
    }
}
