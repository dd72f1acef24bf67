use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Counters for driver and submission activity
#[derive(Debug, Default)]
pub struct FlowMetrics {
    pub ticks: AtomicU64,
    pub skipped_ticks: AtomicU64,
    pub phases_completed: AtomicU64,
    pub recoverable_failures: AtomicU64,
    pub fatal_failures: AtomicU64,
    pub submissions: AtomicU64,
    pub reused_submissions: AtomicU64,
}

impl FlowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_tick(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_phase_completed(&self) {
        self.phases_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recoverable_failure(&self) {
        self.recoverable_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fatal_failure(&self) {
        self.fatal_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submission(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    /// A submission that was found on chain instead of being sent again
    pub fn record_reused_submission(&self) {
        self.reused_submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> FlowStats {
        FlowStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            phases_completed: self.phases_completed.load(Ordering::Relaxed),
            recoverable_failures: self.recoverable_failures.load(Ordering::Relaxed),
            fatal_failures: self.fatal_failures.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
            reused_submissions: self.reused_submissions.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            ticks = stats.ticks,
            skipped_ticks = stats.skipped_ticks,
            phases_completed = stats.phases_completed,
            recoverable_failures = stats.recoverable_failures,
            fatal_failures = stats.fatal_failures,
            submissions = stats.submissions,
            reused_submissions = stats.reused_submissions,
            "Offramp flow metrics"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStats {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub phases_completed: u64,
    pub recoverable_failures: u64,
    pub fatal_failures: u64,
    pub submissions: u64,
    pub reused_submissions: u64,
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) -> u128 {
        let duration = self.start.elapsed().as_millis();
        info!(
            operation = %self.operation,
            duration_ms = duration,
            "Operation completed"
        );
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = FlowMetrics::new();
        metrics.record_tick();
        metrics.record_tick();
        metrics.record_submission();
        metrics.record_reused_submission();
        metrics.record_fatal_failure();

        let stats = metrics.get_stats();
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.submissions, 1);
        assert_eq!(stats.reused_submissions, 1);
        assert_eq!(stats.fatal_failures, 1);
        assert_eq!(stats.recoverable_failures, 0);
    }
}
