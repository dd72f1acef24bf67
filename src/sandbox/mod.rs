//! In-process networks for local runs and tests
//!
//! The sandbox keeps one ledger shared by the Polygon, Pendulum and Stellar clients, so a bridge
//! or redeem on one chain credits the other. It verifies signers, remembers every submission by
//! idempotency key and can be told to misbehave: drop a response after applying a transaction,
//! revert a transaction, or take a whole chain offline.

pub mod anchor;
pub mod network;

pub use anchor::{sandbox_session_result, SandboxAnchor};
pub use network::{
    FaultMode, Outage, RecordedPayment, SandboxChain, SandboxNetwork, SandboxQuoter,
    SANDBOX_ANCHOR_ACCOUNT,
};
