//! The persisted workflow record and its phase model

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::recovery::FlowError;
use crate::amount::{truncate_units, validate_units, AmountError, RawAmount};
use crate::anchor::SessionResult;
use crate::clients::{TransactionRequest, TxHash};
use crate::ephemeral::EphemeralSecret;
use crate::tokens::{InputTokenType, OutputTokenType};

/// Non-terminal phases in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OfframpingPhase {
    PrepareTransactions,
    SquidRouter,
    PendulumFundEphemeral,
    SubsidizePreSwap,
    NablaApprove,
    NablaSwap,
    SubsidizePostSwap,
    ExecuteSpacewalkRedeem,
    PendulumCleanup,
    StellarOfframp,
    StellarCleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FinalOfframpingPhase {
    Success,
    Failure,
}

/// Value of the persisted `phase` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Phase {
    Active(OfframpingPhase),
    Final(FinalOfframpingPhase),
}

impl OfframpingPhase {
    pub const SEQUENCE: [OfframpingPhase; 11] = [
        OfframpingPhase::PrepareTransactions,
        OfframpingPhase::SquidRouter,
        OfframpingPhase::PendulumFundEphemeral,
        OfframpingPhase::SubsidizePreSwap,
        OfframpingPhase::NablaApprove,
        OfframpingPhase::NablaSwap,
        OfframpingPhase::SubsidizePostSwap,
        OfframpingPhase::ExecuteSpacewalkRedeem,
        OfframpingPhase::PendulumCleanup,
        OfframpingPhase::StellarOfframp,
        OfframpingPhase::StellarCleanup,
    ];

    pub fn first() -> Self {
        OfframpingPhase::PrepareTransactions
    }

    /// Zero-based position in [`Self::SEQUENCE`]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Phase {
        match Self::SEQUENCE.get(self.index() + 1) {
            Some(next) => Phase::Active(*next),
            None => Phase::Final(FinalOfframpingPhase::Success),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OfframpingPhase::PrepareTransactions => "prepareTransactions",
            OfframpingPhase::SquidRouter => "squidRouter",
            OfframpingPhase::PendulumFundEphemeral => "pendulumFundEphemeral",
            OfframpingPhase::SubsidizePreSwap => "subsidizePreSwap",
            OfframpingPhase::NablaApprove => "nablaApprove",
            OfframpingPhase::NablaSwap => "nablaSwap",
            OfframpingPhase::SubsidizePostSwap => "subsidizePostSwap",
            OfframpingPhase::ExecuteSpacewalkRedeem => "executeSpacewalkRedeem",
            OfframpingPhase::PendulumCleanup => "pendulumCleanup",
            OfframpingPhase::StellarOfframp => "stellarOfframp",
            OfframpingPhase::StellarCleanup => "stellarCleanup",
        }
    }
}

impl Phase {
    pub const SUCCESS: Phase = Phase::Final(FinalOfframpingPhase::Success);
    pub const FAILURE: Phase = Phase::Final(FinalOfframpingPhase::Failure);

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Final(_))
    }

    pub fn active(&self) -> Option<OfframpingPhase> {
        match self {
            Phase::Active(phase) => Some(*phase),
            Phase::Final(_) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Active(phase) => phase.as_str(),
            Phase::Final(FinalOfframpingPhase::Success) => "success",
            Phase::Final(FinalOfframpingPhase::Failure) => "failure",
        }
    }
}

impl fmt::Display for OfframpingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(phase) = OfframpingPhase::SEQUENCE.iter().find(|p| p.as_str() == s) {
            return Ok(Phase::Active(*phase));
        }
        match s {
            "success" => Ok(Phase::SUCCESS),
            "failure" => Ok(Phase::FAILURE),
            other => Err(format!("unknown phase: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureType {
    Recoverable,
    Fatal,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Recoverable => f.write_str("recoverable"),
            FailureType::Fatal => f.write_str("fatal"),
        }
    }
}

/// Stellar transactions built up front so the final steps need no further construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedStellarTransactions {
    pub offramp: TransactionRequest,
    pub cleanup: TransactionRequest,
}

/// Results recorded by individual phases. Each field has exactly one writer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseOutputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pendulum_ephemeral_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stellar_ephemeral_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stellar_account_creation_hash: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepared_stellar: Option<PreparedStellarTransactions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub squid_router_approve_hash: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub squid_router_swap_hash: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pendulum_bridged_amount: Option<RawAmount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pendulum_funding_hash: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_swap_subsidy_hashes: Option<Vec<TxHash>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nabla_approve_hash: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nabla_swap_hash: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nabla_swap_output: Option<RawAmount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_swap_subsidy_hashes: Option<Vec<TxHash>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spacewalk_redeem_hash: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pendulum_cleanup_hashes: Option<Vec<TxHash>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stellar_offramp_hash: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stellar_cleanup_hashes: Option<Vec<TxHash>>,
}

/// Record a phase output. Rewriting the same value is a no-op, a different value is refused.
pub fn write_once<T: PartialEq + fmt::Debug>(
    slot: &mut Option<T>,
    value: T,
    field: &'static str,
) -> Result<(), FlowError> {
    match slot {
        Some(existing) if *existing == value => Ok(()),
        Some(existing) => Err(FlowError::InvariantViolation {
            reason: format!("{field} already recorded as {existing:?}, refusing {value:?}"),
        }),
        None => {
            *slot = Some(value);
            Ok(())
        }
    }
}

/// The single persisted workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfframpingState {
    pub workflow_id: String,
    pub phase: Phase,
    pub sep24_id: String,
    pub stellar_ephemeral_secret: EphemeralSecret,
    pub pendulum_ephemeral_seed: EphemeralSecret,
    pub input_token_type: InputTokenType,
    pub output_token_type: OutputTokenType,
    pub amount_in: String,
    pub amount_out: String,
    pub source_account: String,
    pub sep_result: SessionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<OfframpingPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub outputs: PhaseOutputs,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to seed a new workflow
#[derive(Debug, Clone)]
pub struct InitialStateParams {
    pub sep24_id: String,
    pub stellar_ephemeral_secret: EphemeralSecret,
    pub pendulum_ephemeral_seed: EphemeralSecret,
    pub execution_input: ExecutionInput,
    pub session_result: SessionResult,
}

impl OfframpingState {
    /// Seed a workflow at the first phase. Inputs must already be validated.
    pub fn new(params: InitialStateParams) -> Result<Self, FlowError> {
        let InitialStateParams {
            sep24_id,
            stellar_ephemeral_secret,
            pendulum_ephemeral_seed,
            execution_input,
            session_result,
        } = params;
        let now = Utc::now();
        Ok(Self {
            workflow_id: uuid::Uuid::new_v4().to_string(),
            phase: Phase::Active(OfframpingPhase::first()),
            sep24_id,
            stellar_ephemeral_secret,
            pendulum_ephemeral_seed,
            input_token_type: execution_input.input_token_type,
            output_token_type: execution_input.output_token_type,
            amount_in: execution_input.amount_in_units.clone(),
            amount_out: truncate_units(&execution_input.min_amount_out_units, 2)?,
            source_account: execution_input.source_account,
            sep_result: session_result,
            failure: None,
            failed_phase: None,
            failure_reason: None,
            outputs: PhaseOutputs::default(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn current_phase(&self) -> Option<OfframpingPhase> {
        self.phase.active()
    }

    pub fn amount_in_source_raw(&self) -> Result<RawAmount, AmountError> {
        RawAmount::from_units(&self.amount_in, self.input_token_type.details().source_decimals)
    }

    pub fn amount_in_pendulum_raw(&self) -> Result<RawAmount, AmountError> {
        RawAmount::from_units(&self.amount_in, self.input_token_type.details().pendulum_decimals)
    }

    pub fn amount_out_pendulum_raw(&self) -> Result<RawAmount, AmountError> {
        RawAmount::from_units(&self.amount_out, self.output_token_type.details().pendulum_decimals)
    }

    pub fn amount_out_stellar_raw(&self) -> Result<RawAmount, AmountError> {
        RawAmount::from_units(&self.amount_out, self.output_token_type.details().stellar_decimals)
    }

    /// Idempotency key of a submission made by this workflow
    pub fn submission_key(&self, step: &str) -> String {
        format!("{}:{}", self.workflow_id, step)
    }

    pub fn pendulum_ephemeral_address(&self) -> Result<&str, FlowError> {
        self.outputs
            .pendulum_ephemeral_address
            .as_deref()
            .ok_or_else(|| FlowError::missing_output("pendulumEphemeralAddress"))
    }

    pub fn stellar_ephemeral_account(&self) -> Result<&str, FlowError> {
        self.outputs
            .stellar_ephemeral_account
            .as_deref()
            .ok_or_else(|| FlowError::missing_output("stellarEphemeralAccount"))
    }

    /// Swap deadline as a unix timestamp, fixed by the creation time so retries reuse it
    pub fn swap_deadline(&self, deadline_minutes: u64) -> i64 {
        (self.created_at + chrono::Duration::minutes(deadline_minutes as i64)).timestamp()
    }

    pub(crate) fn advanced_to(mut self, next: Phase) -> Self {
        self.phase = next;
        self.updated_at = Utc::now();
        self
    }

    pub(crate) fn into_failure(
        mut self,
        failed_phase: OfframpingPhase,
        failure: FailureType,
        reason: String,
    ) -> Self {
        self.phase = Phase::FAILURE;
        self.failure = Some(failure);
        self.failed_phase = Some(failed_phase);
        self.failure_reason = Some(reason);
        self.updated_at = Utc::now();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is not a valid amount: {source}")]
    InvalidAmount {
        field: &'static str,
        #[source]
        source: AmountError,
    },

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("Withdrawal of {amount} is below the anchor minimum of {minimum}")]
    BelowMinimumWithdrawal { amount: String, minimum: String },

    #[error("Invalid source account {0:?}")]
    InvalidSourceAccount(String),

    #[error("Incomplete anchor session: {0}")]
    IncompleteSession(&'static str),
}

/// What the user asked for before any state exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInput {
    pub input_token_type: InputTokenType,
    pub output_token_type: OutputTokenType,
    pub amount_in_units: String,
    pub min_amount_out_units: String,
    pub source_account: String,
}

const EVM_ADDRESS_PATTERN: &str = r"^0x[0-9a-fA-F]{40}$";

impl ExecutionInput {
    pub fn validate(&self, enforce_minimum_withdrawal: bool) -> Result<(), ValidationError> {
        let input = self.input_token_type.details();
        let output = self.output_token_type.details();

        parse_positive("amountIn", &self.amount_in_units, input.source_decimals)?;
        // Must also fit the Pendulum representation
        parse_positive("amountIn", &self.amount_in_units, input.pendulum_decimals)?;

        validate_units(&self.min_amount_out_units).map_err(|source| {
            ValidationError::InvalidAmount {
                field: "minAmountOut",
                source,
            }
        })?;
        let truncated = truncate_units(&self.min_amount_out_units, 2).map_err(|source| {
            ValidationError::InvalidAmount {
                field: "minAmountOut",
                source,
            }
        })?;
        let amount_out = parse_positive("minAmountOut", &truncated, output.stellar_decimals)?;

        if enforce_minimum_withdrawal {
            let minimum = RawAmount::from_units(output.minimum_withdrawal_units, output.stellar_decimals)
                .map_err(|source| ValidationError::InvalidAmount {
                    field: "minimumWithdrawal",
                    source,
                })?;
            if amount_out < minimum {
                return Err(ValidationError::BelowMinimumWithdrawal {
                    amount: truncated,
                    minimum: output.minimum_withdrawal_units.to_string(),
                });
            }
        }

        let valid_account = Regex::new(EVM_ADDRESS_PATTERN)
            .map(|pattern| pattern.is_match(&self.source_account))
            .unwrap_or(false);
        if !valid_account {
            return Err(ValidationError::InvalidSourceAccount(self.source_account.clone()));
        }
        Ok(())
    }
}

impl SessionResult {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.offramping_account.trim().is_empty() {
            return Err(ValidationError::IncompleteSession("offrampingAccount"));
        }
        if self.memo.trim().is_empty() {
            return Err(ValidationError::IncompleteSession("memo"));
        }
        Ok(())
    }
}

fn parse_positive(
    field: &'static str,
    units: &str,
    decimals: u32,
) -> Result<RawAmount, ValidationError> {
    let raw = RawAmount::from_units(units, decimals)
        .map_err(|source| ValidationError::InvalidAmount { field, source })?;
    if raw.is_zero() {
        return Err(ValidationError::NotPositive { field });
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> ExecutionInput {
        ExecutionInput {
            input_token_type: InputTokenType::Usdc,
            output_token_type: OutputTokenType::Eurc,
            amount_in_units: "100.00".to_string(),
            min_amount_out_units: "95.2379".to_string(),
            source_account: "0x7ba99e99bc669b3508aff9cc0a898e869459f877".to_string(),
        }
    }

    fn sample_state() -> OfframpingState {
        OfframpingState::new(InitialStateParams {
            sep24_id: "sep24-1".to_string(),
            stellar_ephemeral_secret: EphemeralSecret::generate(),
            pendulum_ephemeral_seed: EphemeralSecret::generate(),
            execution_input: sample_input(),
            session_result: SessionResult {
                amount: "95.23".to_string(),
                memo: "12345".to_string(),
                memo_type: "text".to_string(),
                offramping_account: "GANCHOR".to_string(),
            },
        })
        .unwrap()
    }

    #[test]
    fn test_phase_sequence_is_total() {
        let mut phase = Phase::Active(OfframpingPhase::first());
        let mut visited = vec![];
        while let Some(active) = phase.active() {
            visited.push(active);
            phase = active.next();
        }
        assert_eq!(visited, OfframpingPhase::SEQUENCE.to_vec());
        assert_eq!(phase, Phase::SUCCESS);
    }

    #[test]
    fn test_phase_serializes_as_camel_case_string() {
        let json = serde_json::to_string(&Phase::Active(OfframpingPhase::ExecuteSpacewalkRedeem)).unwrap();
        assert_eq!(json, "\"executeSpacewalkRedeem\"");
        let back: Phase = serde_json::from_str("\"failure\"").unwrap();
        assert_eq!(back, Phase::FAILURE);
        assert_eq!("nablaSwap".parse::<Phase>().unwrap(), Phase::Active(OfframpingPhase::NablaSwap));
        assert!("teleport".parse::<Phase>().is_err());
    }

    #[test]
    fn test_new_state_starts_at_first_phase_with_truncated_output() {
        let state = sample_state();
        assert_eq!(state.phase, Phase::Active(OfframpingPhase::PrepareTransactions));
        assert_eq!(state.amount_out, "95.23");
        assert_ne!(state.stellar_ephemeral_secret, state.pendulum_ephemeral_seed);
        assert!(state.failure.is_none());
    }

    #[test]
    fn test_state_roundtrips_through_json() {
        let state = sample_state();
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"phase\":\"prepareTransactions\""));
        let back: OfframpingState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_write_once_refuses_conflicting_value() {
        let mut slot = None;
        write_once(&mut slot, "a".to_string(), "field").unwrap();
        write_once(&mut slot, "a".to_string(), "field").unwrap();
        let err = write_once(&mut slot, "b".to_string(), "field").unwrap_err();
        assert!(matches!(err, FlowError::InvariantViolation { .. }));
    }

    #[test]
    fn test_into_failure_remembers_phase() {
        let failed = sample_state().into_failure(
            OfframpingPhase::NablaSwap,
            FailureType::Recoverable,
            "rpc timeout".to_string(),
        );
        assert_eq!(failed.phase, Phase::FAILURE);
        assert_eq!(failed.failed_phase, Some(OfframpingPhase::NablaSwap));
        assert_eq!(failed.failure, Some(FailureType::Recoverable));
    }

    #[test]
    fn test_validation_rejects_bad_input() {
        assert!(sample_input().validate(true).is_ok());

        let mut zero = sample_input();
        zero.amount_in_units = "0.00".to_string();
        assert!(matches!(zero.validate(false), Err(ValidationError::NotPositive { .. })));

        let mut tiny_out = sample_input();
        tiny_out.min_amount_out_units = "0.009".to_string();
        assert!(matches!(tiny_out.validate(false), Err(ValidationError::NotPositive { .. })));

        let mut too_precise = sample_input();
        too_precise.amount_in_units = "1.0000001".to_string();
        assert!(matches!(too_precise.validate(false), Err(ValidationError::InvalidAmount { .. })));

        let mut below_minimum = sample_input();
        below_minimum.min_amount_out_units = "5".to_string();
        assert!(matches!(
            below_minimum.validate(true),
            Err(ValidationError::BelowMinimumWithdrawal { .. })
        ));
        assert!(below_minimum.validate(false).is_ok());

        let mut bad_account = sample_input();
        bad_account.source_account = "0x123".to_string();
        assert!(matches!(bad_account.validate(false), Err(ValidationError::InvalidSourceAccount(_))));
    }

    #[test]
    fn test_swap_deadline_is_stable() {
        let state = sample_state();
        assert_eq!(state.swap_deadline(60), state.swap_deadline(60));
        assert_eq!(state.swap_deadline(60) - state.created_at.timestamp(), 3600);
    }
}
