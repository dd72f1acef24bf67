//! User-facing projection of the persisted state

use serde::Serialize;

use super::state::{FailureType, OfframpingPhase, OfframpingState, Phase};

pub fn phase_message(phase: OfframpingPhase) -> &'static str {
    match phase {
        OfframpingPhase::PrepareTransactions => "1/11: Preparing transactions",
        OfframpingPhase::SquidRouter => "2/11: Bridging assets via Axelar",
        OfframpingPhase::PendulumFundEphemeral => "3/11: Creating Pendulum ephemeral account",
        OfframpingPhase::SubsidizePreSwap => "4/11: Compensating swap risk",
        OfframpingPhase::NablaApprove => "5/11: Approving Forex AMM",
        OfframpingPhase::NablaSwap => "6/11: Swapping on Forex AMM",
        OfframpingPhase::SubsidizePostSwap => "7/11: Compensating swap risk",
        OfframpingPhase::ExecuteSpacewalkRedeem => "8/11: Bridging assets via Spacewalk",
        OfframpingPhase::PendulumCleanup => "9/11: Cleaning up Pendulum ephemeral account",
        OfframpingPhase::StellarOfframp => "10/11: Offramping on Stellar",
        OfframpingPhase::StellarCleanup => "11/11: Cleaning up Stellar ephemeral account",
    }
}

/// Message for a phase name as stored; anything that is not an active phase has none
pub fn message_for_raw(phase: &str) -> Option<&'static str> {
    match phase.parse::<Phase>() {
        Ok(Phase::Active(phase)) => Some(phase_message(phase)),
        _ => None,
    }
}

/// What the user may do about a failed workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOptions {
    /// Resume the phase that failed
    pub can_continue: bool,
    /// Clear and start over with a new session
    pub can_restart: bool,
}

impl RecoveryOptions {
    pub fn for_failure(failure: FailureType) -> Self {
        match failure {
            FailureType::Recoverable => Self {
                can_continue: true,
                can_restart: true,
            },
            FailureType::Fatal => Self {
                can_continue: false,
                can_restart: true,
            },
        }
    }
}

pub fn failure_message(failure: FailureType) -> &'static str {
    match failure {
        FailureType::Recoverable => {
            "The transaction was interrupted. You can continue where it stopped or start over."
        }
        FailureType::Fatal => "The transaction could not be completed. Please start over.",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub workflow_id: String,
    pub sep24_id: String,
    pub phase: Phase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryOptions>,
}

impl ProgressView {
    pub fn from_state(state: &OfframpingState) -> Self {
        let (message, recovery) = match (state.phase, state.failure) {
            (Phase::Active(phase), _) => (phase_message(phase).to_string(), None),
            (Phase::Final(_), Some(failure)) => (
                failure_message(failure).to_string(),
                Some(RecoveryOptions::for_failure(failure)),
            ),
            (Phase::Final(_), None) if state.phase == Phase::SUCCESS => (
                format!("Your withdrawal of {} is on its way", state.amount_out),
                None,
            ),
            // A failure record without a classification is treated as fatal
            (Phase::Final(_), None) => (
                failure_message(FailureType::Fatal).to_string(),
                Some(RecoveryOptions::for_failure(FailureType::Fatal)),
            ),
        };

        Self {
            workflow_id: state.workflow_id.clone(),
            sep24_id: state.sep24_id.clone(),
            phase: state.phase,
            message,
            failure: state.failure,
            failure_reason: state.failure_reason.clone(),
            recovery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_phase_has_a_numbered_message() {
        for (i, phase) in OfframpingPhase::SEQUENCE.iter().enumerate() {
            let message = phase_message(*phase);
            assert!(
                message.starts_with(&format!("{}/11: ", i + 1)),
                "{phase} renders {message}"
            );
        }
    }

    #[test]
    fn test_raw_phase_names() {
        assert_eq!(message_for_raw("nablaSwap"), Some("6/11: Swapping on Forex AMM"));
        assert_eq!(message_for_raw("stellarCleanup"), Some("11/11: Cleaning up Stellar ephemeral account"));
        assert_eq!(message_for_raw("success"), None);
        assert_eq!(message_for_raw("failure"), None);
        assert_eq!(message_for_raw("bogusPhase"), None);
    }

    #[test]
    fn test_recovery_options() {
        let recoverable = RecoveryOptions::for_failure(FailureType::Recoverable);
        assert!(recoverable.can_continue);
        assert!(recoverable.can_restart);

        let fatal = RecoveryOptions::for_failure(FailureType::Fatal);
        assert!(!fatal.can_continue);
        assert!(fatal.can_restart);
    }
}
