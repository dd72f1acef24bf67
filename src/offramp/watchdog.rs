use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::driver::OfframpDriver;
use super::recovery::FlowError;
use crate::config::WatchdogConfig;

/// Forces a recoverable failure when no phase completed within the ceiling
pub struct Watchdog {
    driver: Arc<OfframpDriver>,
    ceiling: chrono::Duration,
    check_interval: Duration,
}

impl Watchdog {
    pub fn new(driver: Arc<OfframpDriver>, config: &WatchdogConfig) -> Self {
        Self {
            driver,
            ceiling: config.ceiling(),
            check_interval: Duration::from_secs(config.check_interval_secs.max(1)),
        }
    }

    /// Inspect the stored workflow as of `now`. Returns true when it was force-failed.
    pub async fn check_at(&self, now: DateTime<Utc>) -> Result<bool, FlowError> {
        let Some(state) = self.driver.read_current_state().await? else {
            return Ok(false);
        };
        if state.is_terminal() {
            return Ok(false);
        }

        let idle = now.signed_duration_since(state.updated_at);
        if idle < self.ceiling {
            debug!(
                workflow_id = %state.workflow_id,
                idle_secs = idle.num_seconds(),
                "Watchdog check passed"
            );
            return Ok(false);
        }

        warn!(
            workflow_id = %state.workflow_id,
            phase = %state.phase,
            idle_minutes = idle.num_minutes(),
            "No phase completed within the watchdog ceiling"
        );
        let reason = format!(
            "no progress for {} minutes in phase {}",
            idle.num_minutes(),
            state.phase
        );
        let forced = self.driver.force_recoverable_failure(&reason).await?;
        Ok(forced.is_some_and(|s| s.workflow_id == state.workflow_id))
    }

    pub async fn check(&self) -> Result<bool, FlowError> {
        self.check_at(Utc::now()).await
    }

    /// Check on a fixed interval until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                ceiling_minutes = self.ceiling.num_minutes(),
                "Offramp watchdog started"
            );
            let mut interval = tokio::time::interval(self.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.check().await {
                            error!(error = %e, "Watchdog check failed");
                        }
                    }
                }
            }
            info!("Offramp watchdog stopped");
        })
    }
}
