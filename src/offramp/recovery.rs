//! Error taxonomy of a running workflow and its recoverable/fatal classification
//!
//! Classification is a pure function of the error kind. It never looks at how many times a phase
//! was attempted, so a recoverable error stays recoverable on every resume.

use thiserror::Error;

use super::persistence::PersistenceError;
use super::state::{FailureType, ValidationError};
use crate::amount::{AmountError, RawAmount};
use crate::anchor::AnchorError;
use crate::clients::{ClientError, TxHash};
use crate::tokens::Chain;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{chain} client error: {source}")]
    Client {
        chain: Chain,
        #[source]
        source: ClientError,
    },

    #[error("Anchor error: {0}")]
    Anchor(#[from] AnchorError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Amount error: {0}")]
    Amount(#[from] AmountError),

    #[error("Gave up after {waited_secs}s waiting for {condition}")]
    ConditionTimeout { condition: String, waited_secs: u64 },

    #[error("Transaction {hash} failed on {chain}")]
    TransactionFailed { chain: Chain, hash: TxHash },

    #[error("Insufficient funds in {account}: required {required}, available {available}")]
    InsufficientFunds {
        account: String,
        required: RawAmount,
        available: RawAmount,
    },

    #[error("Subsidy of {required} exceeds the limit of {limit}")]
    SubsidyLimitExceeded { required: RawAmount, limit: RawAmount },

    #[error("Swap quote {quoted} is below the accepted minimum {minimum}")]
    QuoteBelowMinimum { quoted: RawAmount, minimum: RawAmount },

    #[error("Invariant violated: {reason}")]
    InvariantViolation { reason: String },

    #[error("Workflow {workflow_id} is still stored; clear it before starting another")]
    AlreadyInFlight { workflow_id: String },

    #[error("Resume rejected: {reason}")]
    ResumeRejected { reason: String },

    #[error("Workflow was cancelled")]
    Cancelled,
}

impl FlowError {
    /// Adapter for `map_err` that tags a client error with its chain
    pub fn client(chain: Chain) -> impl Fn(ClientError) -> FlowError {
        move |source| FlowError::Client { chain, source }
    }

    pub(crate) fn missing_output(field: &str) -> FlowError {
        FlowError::InvariantViolation {
            reason: format!("{field} was not recorded by an earlier phase"),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::Client { source, .. } => match source {
                ClientError::Network(_) => ErrorKind::Network,
                ClientError::Timeout(_) => ErrorKind::Timeout,
                ClientError::RateLimited => ErrorKind::RateLimited,
                ClientError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
                ClientError::InvalidSignature(_) => ErrorKind::InvalidSignature,
                ClientError::Rejected(_) => ErrorKind::ProtocolRejection,
                ClientError::DuplicateSubmission(_) => ErrorKind::DuplicateSubmission,
                ClientError::UnknownTransaction(_) => ErrorKind::Unknown,
            },
            FlowError::Anchor(source) => match source {
                AnchorError::Network(_) => ErrorKind::Network,
                AnchorError::Timeout(_) => ErrorKind::Timeout,
                AnchorError::SessionExpired => ErrorKind::SessionExpired,
                AnchorError::SessionRejected(_) => ErrorKind::SessionRejected,
                AnchorError::Malformed(_) => ErrorKind::ProtocolRejection,
            },
            FlowError::Persistence(_) => ErrorKind::Storage,
            FlowError::ConditionTimeout { .. } => ErrorKind::PendingCondition,
            FlowError::TransactionFailed { .. } => ErrorKind::ProtocolRejection,
            FlowError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            FlowError::SubsidyLimitExceeded { .. } => ErrorKind::SubsidyLimit,
            FlowError::QuoteBelowMinimum { .. } => ErrorKind::ProtocolRejection,
            FlowError::Amount(_) | FlowError::InvariantViolation { .. } => {
                ErrorKind::InvariantViolation
            }
            FlowError::Cancelled => ErrorKind::Cancelled,
            FlowError::Validation(_)
            | FlowError::AlreadyInFlight { .. }
            | FlowError::ResumeRejected { .. } => ErrorKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimited,
    /// A bounded wait ran out before the awaited condition held
    PendingCondition,
    /// Local state store could not be read or written
    Storage,
    Cancelled,
    InsufficientFunds,
    SubsidyLimit,
    InvalidSignature,
    ProtocolRejection,
    DuplicateSubmission,
    SessionExpired,
    SessionRejected,
    InvariantViolation,
    Unknown,
}

/// The classification table
pub fn classify_kind(kind: ErrorKind) -> FailureType {
    match kind {
        ErrorKind::Network
        | ErrorKind::Timeout
        | ErrorKind::RateLimited
        | ErrorKind::PendingCondition
        | ErrorKind::Storage
        | ErrorKind::Cancelled => FailureType::Recoverable,
        ErrorKind::InsufficientFunds
        | ErrorKind::SubsidyLimit
        | ErrorKind::InvalidSignature
        | ErrorKind::ProtocolRejection
        | ErrorKind::DuplicateSubmission
        | ErrorKind::SessionExpired
        | ErrorKind::SessionRejected
        | ErrorKind::InvariantViolation
        | ErrorKind::Unknown => FailureType::Fatal,
    }
}

pub fn classify(error: &FlowError) -> FailureType {
    classify_kind(error.kind())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(source: ClientError) -> FlowError {
        FlowError::Client {
            chain: Chain::Pendulum,
            source,
        }
    }

    #[test]
    fn test_transport_errors_are_recoverable() {
        assert_eq!(classify(&client(ClientError::Network("reset".into()))), FailureType::Recoverable);
        assert_eq!(classify(&client(ClientError::Timeout("rpc".into()))), FailureType::Recoverable);
        assert_eq!(classify(&client(ClientError::RateLimited)), FailureType::Recoverable);
        assert_eq!(
            classify(&FlowError::Anchor(AnchorError::Network("dns".into()))),
            FailureType::Recoverable
        );
        assert_eq!(
            classify(&FlowError::ConditionTimeout {
                condition: "bridge arrival".into(),
                waited_secs: 900
            }),
            FailureType::Recoverable
        );
    }

    #[test]
    fn test_rejections_are_fatal() {
        let insufficient = client(ClientError::InsufficientFunds {
            account: "5Gx".into(),
            required: RawAmount::new(10),
            available: RawAmount::new(1),
        });
        assert_eq!(classify(&insufficient), FailureType::Fatal);
        assert_eq!(classify(&client(ClientError::InvalidSignature("bad".into()))), FailureType::Fatal);
        assert_eq!(classify(&client(ClientError::Rejected("slippage".into()))), FailureType::Fatal);
        assert_eq!(classify(&client(ClientError::DuplicateSubmission("k".into()))), FailureType::Fatal);
        assert_eq!(classify(&FlowError::Anchor(AnchorError::SessionExpired)), FailureType::Fatal);
        assert_eq!(
            classify(&FlowError::Anchor(AnchorError::SessionRejected("kyc".into()))),
            FailureType::Fatal
        );
        assert_eq!(
            classify(&FlowError::SubsidyLimitExceeded {
                required: RawAmount::new(10),
                limit: RawAmount::new(5)
            }),
            FailureType::Fatal
        );
    }

    #[test]
    fn test_unknown_defaults_to_fatal() {
        assert_eq!(classify(&client(ClientError::UnknownTransaction("0x1".into()))), FailureType::Fatal);
        assert_eq!(classify_kind(ErrorKind::Unknown), FailureType::Fatal);
    }
}
