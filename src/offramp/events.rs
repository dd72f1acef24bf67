//! Progress and analytics events
//!
//! Events are fanned out over a broadcast channel. Some events describe a one-off milestone of a
//! workflow and are emitted at most once until [`EventTracker::reset_unique_events`] is called,
//! even when the code path that emits them runs again on resume.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

use super::state::{FailureType, OfframpingPhase, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningPhase {
    Started,
    Approved,
    Signed,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlowEvent {
    TransactionConfirmation {
        from_asset: String,
        to_asset: String,
        from_amount: String,
        to_amount: String,
    },
    InteractiveSessionOpened {
        id: String,
        url: String,
    },
    KycCompleted {
        workflow_id: String,
    },
    SigningRequested {
        phase: SigningPhase,
    },
    PhaseCompleted {
        workflow_id: String,
        phase: OfframpingPhase,
        next: Phase,
    },
    TransactionSuccess {
        workflow_id: String,
    },
    TransactionFailure {
        workflow_id: String,
        failed_phase: OfframpingPhase,
        failure: FailureType,
        reason: String,
    },
}

impl FlowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FlowEvent::TransactionConfirmation { .. } => "transaction_confirmation",
            FlowEvent::InteractiveSessionOpened { .. } => "interactive_session_opened",
            FlowEvent::KycCompleted { .. } => "kyc_completed",
            FlowEvent::SigningRequested { .. } => "signing_requested",
            FlowEvent::PhaseCompleted { .. } => "phase_completed",
            FlowEvent::TransactionSuccess { .. } => "transaction_success",
            FlowEvent::TransactionFailure { .. } => "transaction_failure",
        }
    }

    fn is_unique(&self) -> bool {
        matches!(
            self,
            FlowEvent::TransactionConfirmation { .. }
                | FlowEvent::KycCompleted { .. }
                | FlowEvent::TransactionSuccess { .. }
                | FlowEvent::TransactionFailure { .. }
        )
    }
}

#[derive(Debug)]
pub struct EventTracker {
    sender: broadcast::Sender<FlowEvent>,
    emitted_unique: Mutex<HashSet<&'static str>>,
}

impl Default for EventTracker {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventTracker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            emitted_unique: Mutex::new(HashSet::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. Returns false when a unique event was already emitted.
    pub fn track(&self, event: FlowEvent) -> bool {
        if event.is_unique() {
            let mut emitted = self
                .emitted_unique
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !emitted.insert(event.name()) {
                debug!(event = event.name(), "Unique event already emitted, skipping");
                return false;
            }
        }
        debug!(event = event.name(), "Tracking event");
        // No subscribers is fine
        let _ = self.sender.send(event);
        true
    }

    pub fn reset_unique_events(&self) {
        self.emitted_unique
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unique_events_are_deduplicated_until_reset() {
        let tracker = EventTracker::default();
        let mut rx = tracker.subscribe();
        let event = FlowEvent::KycCompleted {
            workflow_id: "wf".to_string(),
        };

        assert!(tracker.track(event.clone()));
        assert!(!tracker.track(event.clone()));
        tracker.reset_unique_events();
        assert!(tracker.track(event.clone()));

        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(rx.recv().await.unwrap(), event);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_repeatable_events_always_emit() {
        let tracker = EventTracker::default();
        let event = FlowEvent::SigningRequested {
            phase: SigningPhase::Started,
        };
        assert!(tracker.track(event.clone()));
        assert!(tracker.track(event));
    }

    #[test]
    fn test_event_serializes_with_name_tag() {
        let json = serde_json::to_value(FlowEvent::SigningRequested {
            phase: SigningPhase::Approved,
        })
        .unwrap();
        assert_eq!(json["event"], "signing_requested");
        assert_eq!(json["phase"], "approved");
    }
}
