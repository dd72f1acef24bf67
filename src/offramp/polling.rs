use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::recovery::FlowError;

/// Poll `check` every `interval` until it yields a value.
///
/// The first check runs immediately. Running past `max_wait` raises a recoverable
/// [`FlowError::ConditionTimeout`], cancellation raises [`FlowError::Cancelled`].
pub async fn poll_until<T, F, Fut>(
    condition: &str,
    interval: Duration,
    max_wait: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, FlowError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, FlowError>>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        attempts += 1;
        if let Some(value) = check().await? {
            debug!(condition, attempts, "Condition met");
            return Ok(value);
        }

        if started.elapsed() >= max_wait {
            return Err(FlowError::ConditionTimeout {
                condition: condition.to_string(),
                waited_secs: max_wait.as_secs(),
            });
        }

        debug!(condition, attempts, "Condition not met yet, polling again");
        tokio::select! {
            _ = cancel.cancelled() => return Err(FlowError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
