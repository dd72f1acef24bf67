// Pendulum Offramp Library - resumable cross-chain offramp state machine
// This exposes the core components for testing and integration

pub mod amount;
pub mod anchor;
pub mod cli;
pub mod clients;
pub mod config;
pub mod ephemeral;
pub mod observability;
pub mod offramp;
pub mod sandbox;
pub mod shutdown;
pub mod telemetry;
pub mod tokens;

// Re-export key types for easy access
pub use amount::{AmountError, RawAmount};
pub use anchor::{AnchorError, AnchorSessionAdapter, OfframpOnboarding, SessionResult};
pub use clients::{ChainClient, ClientError, NetworkClients, SwapQuoter, TransactionRequest, TxHash};
pub use config::OfframpConfig;
pub use ephemeral::EphemeralSecret;
pub use observability::{FlowMetrics, OperationTimer};
pub use offramp::{
    classify, ExecutionInput, FailureType, FileSystemStore, FlowError, InMemoryStore,
    InitialStateParams, OfframpDriver, OfframpingPhase, OfframpingState, Phase, StateStore,
    Watchdog,
};
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{create_workflow_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use tokens::{AssetId, Chain, InputTokenType, OutputTokenType};
