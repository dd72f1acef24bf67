//! Cross-chain offramp state machine
//!
//! A single persisted [`OfframpingState`] is advanced one phase per tick by the
//! [`OfframpDriver`]. Each phase is executed by the [`PhaseExecutor`], errors are classified by
//! [`recovery::classify`], and every on-chain submission goes through the [`Submitter`] so that a
//! resumed phase never broadcasts the same transaction twice.

pub mod driver;
pub mod events;
pub mod persistence;
pub mod phases;
pub mod polling;
pub mod progress;
pub mod recovery;
pub mod state;
pub mod submission;
pub mod watchdog;

pub use driver::{OfframpDriver, TickOutcome};
pub use events::{EventTracker, FlowEvent, SigningPhase};
pub use persistence::{
    FileSystemStore, InMemoryStore, PendingSubmission, PersistenceError, StateStore,
};
pub use phases::{PhaseContext, PhaseExecutor};
pub use progress::{message_for_raw, phase_message, ProgressView, RecoveryOptions};
pub use recovery::{classify, classify_kind, ErrorKind, FlowError};
pub use state::{
    ExecutionInput, FailureType, FinalOfframpingPhase, InitialStateParams, OfframpingPhase,
    OfframpingState, Phase, PhaseOutputs, ValidationError,
};
pub use submission::Submitter;
pub use watchdog::Watchdog;
