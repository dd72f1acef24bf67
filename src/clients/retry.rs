// Retry logic for transient chain client failures
// Only reads are retried here. Submissions go through the idempotent submission path instead.

use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use super::ClientError;
use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryHandler {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryHandler {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryHandler {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    /// `base, 2 * base, 4 * base, ...` capped at `max_delay`. The strategy yields `2^n * factor`.
    fn delays(&self) -> Vec<Duration> {
        let factor = (self.base_delay.as_millis() as u64 / 2).max(1);
        let backoff = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .take(self.max_attempts.saturating_sub(1) as usize);
        if self.jitter {
            backoff.map(jitter).collect()
        } else {
            backoff.collect()
        }
    }

    /// Execute a client call, retrying transient failures with exponential backoff
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let operation_id = uuid::Uuid::new_v4();
        debug!(
            operation = operation_name,
            operation_id = %operation_id,
            max_attempts = self.max_attempts,
            "Starting retryable client call"
        );

        RetryIf::spawn(
            self.delays(),
            || operation(),
            |error: &ClientError| {
                let retry = error.is_transient();
                if retry {
                    warn!(
                        operation = operation_name,
                        operation_id = %operation_id,
                        error = %error,
                        "Client call failed (retryable)"
                    );
                }
                retry
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_handler() -> RetryHandler {
        RetryHandler::new(&RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: false,
        })
    }

    #[test]
    fn test_delays_double_from_base() {
        let handler = RetryHandler::new(&RetryConfig {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 3_000,
            jitter: false,
        });
        let delays: Vec<u128> = handler.delays().iter().map(Duration::as_millis).collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 3_000]);
    }

    #[tokio::test]
    async fn test_retry_success_after_failure() {
        let handler = fast_handler();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = handler
            .execute_with_retry("balance", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ClientError::Network("connection reset".to_string()))
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let handler = fast_handler();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = handler
            .execute_with_retry("status", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::Rejected("bad nonce".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(ClientError::Rejected(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let handler = fast_handler();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), _> = handler
            .execute_with_retry("lookup", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::Timeout("rpc".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(ClientError::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
