//! Shared harness for offramp integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};

use pendulum_offramp::config::OfframpConfig;
use pendulum_offramp::ephemeral::EphemeralSecret;
use pendulum_offramp::offramp::{
    ExecutionInput, FlowEvent, InMemoryStore, InitialStateParams, OfframpDriver, OfframpingState,
    PendingSubmission, PersistenceError, StateStore,
};
use pendulum_offramp::sandbox::{sandbox_session_result, SandboxNetwork};
use pendulum_offramp::tokens::{InputTokenType, OutputTokenType};

pub const USER: &str = "0x1111111111111111111111111111111111111111";
pub const SEP24_ID: &str = "sep24-integration";

pub struct Harness {
    pub config: OfframpConfig,
    pub network: SandboxNetwork,
    pub store: Arc<dyn StateStore>,
    pub driver: Arc<OfframpDriver>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn StateStore>) -> Self {
        Self::configured(OfframpConfig::default().for_sandbox(), store)
    }

    pub fn configured(config: OfframpConfig, store: Arc<dyn StateStore>) -> Self {
        let network = SandboxNetwork::seeded(&config, USER);
        Self::on_network(config, network, store)
    }

    /// A second driver over an existing network and store, as after a process restart
    pub fn on_network(config: OfframpConfig, network: SandboxNetwork, store: Arc<dyn StateStore>) -> Self {
        let driver = Arc::new(OfframpDriver::new(
            Arc::clone(&store),
            network.clients(),
            config.clone(),
        ));
        Self {
            config,
            network,
            store,
            driver,
        }
    }

    pub async fn start(&self) -> OfframpingState {
        self.start_with("100.00", "95.00").await
    }

    pub async fn start_with(&self, amount_in: &str, min_amount_out: &str) -> OfframpingState {
        self.driver
            .construct_initial_state(params(amount_in, min_amount_out))
            .await
            .expect("initial state")
    }
}

pub fn input(amount_in: &str, min_amount_out: &str) -> ExecutionInput {
    ExecutionInput {
        input_token_type: InputTokenType::Usdc,
        output_token_type: OutputTokenType::Eurc,
        amount_in_units: amount_in.to_string(),
        min_amount_out_units: min_amount_out.to_string(),
        source_account: USER.to_string(),
    }
}

pub fn params(amount_in: &str, min_amount_out: &str) -> InitialStateParams {
    InitialStateParams {
        sep24_id: SEP24_ID.to_string(),
        stellar_ephemeral_secret: EphemeralSecret::generate(),
        pendulum_ephemeral_seed: EphemeralSecret::generate(),
        execution_input: input(amount_in, min_amount_out),
        session_result: sandbox_session_result(SEP24_ID, min_amount_out),
    }
}

/// Everything already sitting in the channel
pub fn drain(receiver: &mut broadcast::Receiver<FlowEvent>) -> Vec<FlowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// Wait until an event matching `predicate` arrives
pub async fn wait_for(
    receiver: &mut broadcast::Receiver<FlowEvent>,
    predicate: impl Fn(&FlowEvent) -> bool,
) -> FlowEvent {
    loop {
        let event = receiver.recv().await.expect("event channel open");
        if predicate(&event) {
            return event;
        }
    }
}

/// In-memory store that can hold one `write` until the test releases it
#[derive(Default)]
pub struct GatedStore {
    inner: InMemoryStore,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `write` blocks until [`GatedStore::release_write`]
    pub fn hold_next_write(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Resolves once the held write has started
    pub async fn write_started(&self) {
        self.entered.notified().await;
    }

    pub fn release_write(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl StateStore for GatedStore {
    async fn read(&self) -> Result<Option<OfframpingState>, PersistenceError> {
        self.inner.read().await
    }

    async fn write(&self, state: &OfframpingState) -> Result<(), PersistenceError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.write(state).await
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        self.inner.clear().await
    }

    async fn read_submission(&self, key: &str) -> Result<Option<PendingSubmission>, PersistenceError> {
        self.inner.read_submission(key).await
    }

    async fn write_submission(&self, record: &PendingSubmission) -> Result<(), PersistenceError> {
        self.inner.write_submission(record).await
    }

    async fn list_submissions(&self) -> Result<Vec<PendingSubmission>, PersistenceError> {
        self.inner.list_submissions().await
    }
}
