//! Bounded retries with exponential backoff and jitter.
//!
//! Only two call sites retry inside a reconcile pass: finalizer and action
//! updates on optimistic-concurrency conflicts, and the Service re-read right
//! after an upsert. Every other failure aborts the pass and is retried by the
//! work queue.

use crate::error::{ControllerError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    /// Five quick attempts, the API server's usual conflict retry policy
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }
}

/// Run `operation` until it succeeds, fails with an error `retryable` rejects,
/// or `config.max_attempts` is reached.
pub async fn retry_when<F, Fut, T, P>(
    config: &RetryConfig,
    operation_name: &str,
    retryable: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&ControllerError) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !retryable(&err) || attempt >= config.max_attempts {
            return Err(err);
        }

        let jitter = rand::thread_rng().gen_range(0.9..1.1);
        let wait = delay.mul_f64(jitter);
        warn!(
            operation = %operation_name,
            attempt,
            error = %err,
            delay_ms = wait.as_millis() as u64,
            "Retrying after transient failure"
        );
        tokio::time::sleep(wait).await;

        delay = delay
            .mul_f64(config.backoff_multiplier)
            .min(config.max_delay);
    }
}

/// Retry on optimistic-concurrency conflicts only
pub async fn retry_on_conflict<F, Fut, T>(operation_name: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_when(
        &RetryConfig::default(),
        operation_name,
        ControllerError::is_conflict,
        operation,
    )
    .await
}

/// Retry while the object is not yet visible
pub async fn retry_on_not_found<F, Fut, T>(operation_name: &str, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_when(
        &RetryConfig::default(),
        operation_name,
        ControllerError::is_not_found,
        operation,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = retry_on_conflict("update", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ControllerError::conflict("Devbox", "ns/box"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_fail_fast() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<()> = retry_on_conflict("update", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ControllerError::not_found("Devbox", "ns/box"))
            }
        })
        .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2.0,
        };

        let result: Result<()> = retry_when(&config, "get", ControllerError::is_not_found, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ControllerError::not_found("Service", "ns/box-svc"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
