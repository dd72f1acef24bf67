//! The tick loop
//!
//! A tick reads the persisted state, runs the current phase and writes the result back. The
//! persisted state is the only source of truth: the driver keeps nothing about a workflow in
//! memory except the single-flight marker and the cancellation token of the running tick.
//!
//! Every read-then-write of the stored record (tick write-back, construct, resume, force-fail,
//! clear) runs under one async write lock, so a clear can never be overwritten by a tick that
//! checked the store just before it.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use super::events::{EventTracker, FlowEvent};
use super::persistence::StateStore;
use super::phases::{PhaseContext, PhaseExecutor};
use super::recovery::{classify, FlowError};
use super::state::{FailureType, InitialStateParams, OfframpingPhase, OfframpingState, Phase};
use super::submission::Submitter;
use crate::clients::{NetworkClients, RetryHandler};
use crate::config::OfframpConfig;
use crate::observability::{FlowMetrics, OperationTimer};
use crate::telemetry::{create_workflow_span, generate_correlation_id};

/// Outcome of a single tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing is persisted
    Idle,
    /// The stored workflow is already terminal
    Terminal(OfframpingState),
    /// Another tick of the same workflow is running
    Skipped(OfframpingState),
    Advanced(OfframpingState),
    Failed(OfframpingState),
    /// The workflow changed underneath the tick; the result was thrown away
    Discarded(Option<OfframpingState>),
    /// The tick was cancelled before finishing; nothing was written
    Cancelled(Option<OfframpingState>),
}

impl TickOutcome {
    pub fn state(&self) -> Option<&OfframpingState> {
        match self {
            TickOutcome::Idle => None,
            TickOutcome::Terminal(state)
            | TickOutcome::Skipped(state)
            | TickOutcome::Advanced(state)
            | TickOutcome::Failed(state) => Some(state),
            TickOutcome::Discarded(state) | TickOutcome::Cancelled(state) => state.as_ref(),
        }
    }

    pub fn into_state(self) -> Option<OfframpingState> {
        match self {
            TickOutcome::Idle => None,
            TickOutcome::Terminal(state)
            | TickOutcome::Skipped(state)
            | TickOutcome::Advanced(state)
            | TickOutcome::Failed(state) => Some(state),
            TickOutcome::Discarded(state) | TickOutcome::Cancelled(state) => state,
        }
    }
}

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Marks a workflow as being ticked; released on drop
struct SingleFlightGuard {
    in_flight: InFlight,
    workflow_id: String,
}

impl SingleFlightGuard {
    fn acquire(in_flight: &InFlight, workflow_id: &str) -> Option<Self> {
        let mut active = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(workflow_id.to_string()) {
            return None;
        }
        Some(Self {
            in_flight: Arc::clone(in_flight),
            workflow_id: workflow_id.to_string(),
        })
    }
}

impl Drop for SingleFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.workflow_id);
    }
}

pub struct OfframpDriver {
    store: Arc<dyn StateStore>,
    clients: NetworkClients,
    config: Arc<OfframpConfig>,
    executor: PhaseExecutor,
    events: Arc<EventTracker>,
    metrics: Arc<FlowMetrics>,
    in_flight: InFlight,
    /// Held across every compare-and-write of the stored record, never across a phase
    write_lock: AsyncMutex<()>,
    tokens: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
}

impl OfframpDriver {
    pub fn new(store: Arc<dyn StateStore>, clients: NetworkClients, config: OfframpConfig) -> Self {
        Self::with_shutdown(store, clients, config, CancellationToken::new())
    }

    /// Workflow tokens become children of `shutdown`
    pub fn with_shutdown(
        store: Arc<dyn StateStore>,
        clients: NetworkClients,
        config: OfframpConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let config = Arc::new(config);
        let metrics = Arc::new(FlowMetrics::new());
        let events = Arc::new(EventTracker::default());
        let submitter = Submitter::new(
            Arc::clone(&store),
            RetryHandler::new(&config.retry),
            config.polling.clone(),
            Arc::clone(&metrics),
        );
        let executor = PhaseExecutor::new(PhaseContext {
            clients: clients.clone(),
            config: Arc::clone(&config),
            submitter,
            events: Arc::clone(&events),
        });
        Self {
            store,
            clients,
            config,
            executor,
            events,
            metrics,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            write_lock: AsyncMutex::new(()),
            tokens: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn clients(&self) -> &NetworkClients {
        &self.clients
    }

    pub fn config(&self) -> &OfframpConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventTracker> {
        &self.events
    }

    pub fn metrics(&self) -> &Arc<FlowMetrics> {
        &self.metrics
    }

    pub async fn read_current_state(&self) -> Result<Option<OfframpingState>, FlowError> {
        Ok(self.store.read().await?)
    }

    /// Persist a brand-new workflow at the first phase.
    ///
    /// Refused while any workflow is stored, finished or not: a failed workflow may still hold
    /// funds on its ephemeral accounts, so only an explicit clear makes room for a new one.
    pub async fn construct_initial_state(
        &self,
        params: InitialStateParams,
    ) -> Result<OfframpingState, FlowError> {
        params
            .execution_input
            .validate(!self.config.test.overwrite_minimum_transfer_amount)?;
        params.session_result.validate()?;

        let _write = self.write_lock.lock().await;
        self.ensure_nothing_stored().await?;

        let state = OfframpingState::new(params)?;
        self.store.write(&state).await?;
        self.events.reset_unique_events();
        info!(
            workflow_id = %state.workflow_id,
            sep24_id = %state.sep24_id,
            amount_in = %state.amount_in,
            amount_out = %state.amount_out,
            "Offramping state constructed"
        );
        Ok(state)
    }

    /// Fails with [`FlowError::AlreadyInFlight`] when a workflow is stored
    pub async fn ensure_nothing_stored(&self) -> Result<(), FlowError> {
        match self.store.read().await? {
            None => Ok(()),
            Some(existing) => {
                info!(
                    workflow_id = %existing.workflow_id,
                    phase = %existing.phase,
                    "A workflow is still stored, refusing to start another"
                );
                Err(FlowError::AlreadyInFlight {
                    workflow_id: existing.workflow_id,
                })
            }
        }
    }

    /// One tick. Returns the state after the tick, or `None` when nothing is stored.
    pub async fn advance_offramping_state(&self) -> Result<Option<OfframpingState>, FlowError> {
        Ok(self.tick().await?.into_state())
    }

    /// Tick until the workflow is terminal or progress halts
    pub async fn run_to_completion(&self) -> Result<Option<OfframpingState>, FlowError> {
        loop {
            match self.tick().await? {
                TickOutcome::Advanced(state) if !state.is_terminal() => continue,
                outcome => return Ok(outcome.into_state()),
            }
        }
    }

    pub async fn tick(&self) -> Result<TickOutcome, FlowError> {
        let Some(state) = self.store.read().await? else {
            return Ok(TickOutcome::Idle);
        };
        let Some(phase) = state.current_phase() else {
            return Ok(TickOutcome::Terminal(state));
        };

        let Some(_guard) = SingleFlightGuard::acquire(&self.in_flight, &state.workflow_id) else {
            self.metrics.record_skipped_tick();
            debug!(workflow_id = %state.workflow_id, "Tick already in flight, skipping");
            return Ok(TickOutcome::Skipped(state));
        };

        self.metrics.record_tick();
        let correlation_id = generate_correlation_id();
        let span = create_workflow_span(&state.workflow_id, phase.as_str(), &correlation_id);
        self.run_phase(state, phase).instrument(span).await
    }

    async fn run_phase(
        &self,
        state: OfframpingState,
        phase: OfframpingPhase,
    ) -> Result<TickOutcome, FlowError> {
        let cancel = self.workflow_token(&state.workflow_id);
        let timer = OperationTimer::new(phase.as_str());
        let result = self.executor.execute(&state, &cancel).await;
        timer.finish();

        let next = match result {
            Ok(next) => next,
            Err(_) if cancel.is_cancelled() => {
                info!(workflow_id = %state.workflow_id, phase = %phase, "Tick cancelled, nothing persisted");
                // Whoever cancelled holds the write lock until its own write is done
                let _write = self.write_lock.lock().await;
                return Ok(TickOutcome::Cancelled(self.store.read().await?));
            }
            Err(error) => {
                let failure = classify(&error);
                match failure {
                    FailureType::Recoverable => {
                        self.metrics.record_recoverable_failure();
                        warn!(phase = %phase, error = %error, "Phase failed, recoverable");
                    }
                    FailureType::Fatal => {
                        self.metrics.record_fatal_failure();
                        error!(phase = %phase, error = %error, "Phase failed, fatal");
                    }
                }
                state.clone().into_failure(phase, failure, error.to_string())
            }
        };

        // Only write back over the record this tick started from
        let _write = self.write_lock.lock().await;
        let current = self.store.read().await?;
        let unchanged = current
            .as_ref()
            .is_some_and(|c| c.workflow_id == state.workflow_id && c.phase == state.phase);
        if !unchanged {
            warn!(
                workflow_id = %state.workflow_id,
                phase = %phase,
                "Stored workflow changed during tick, discarding result"
            );
            return Ok(TickOutcome::Discarded(current));
        }

        self.store.write(&next).await?;
        Ok(self.report(phase, next))
    }

    fn report(&self, phase: OfframpingPhase, next: OfframpingState) -> TickOutcome {
        let workflow_id = next.workflow_id.clone();
        match next.phase {
            Phase::Final(_) if next.failure.is_some() => {
                self.events.track(FlowEvent::TransactionFailure {
                    workflow_id,
                    failed_phase: phase,
                    failure: next.failure.unwrap_or(FailureType::Fatal),
                    reason: next.failure_reason.clone().unwrap_or_default(),
                });
                TickOutcome::Failed(next)
            }
            _ => {
                self.metrics.record_phase_completed();
                self.events.track(FlowEvent::PhaseCompleted {
                    workflow_id: workflow_id.clone(),
                    phase,
                    next: next.phase,
                });
                if next.phase == Phase::SUCCESS {
                    info!(workflow_id = %workflow_id, "Offramp completed successfully");
                    self.events.track(FlowEvent::TransactionSuccess { workflow_id });
                }
                TickOutcome::Advanced(next)
            }
        }
    }

    /// Re-enter the phase that failed. Only recoverable failures can be resumed.
    pub async fn resume_failed_flow(&self) -> Result<OfframpingState, FlowError> {
        let _write = self.write_lock.lock().await;
        let Some(mut state) = self.store.read().await? else {
            return Err(FlowError::ResumeRejected {
                reason: "no workflow is stored".to_string(),
            });
        };
        if state.phase != Phase::FAILURE {
            debug!(workflow_id = %state.workflow_id, phase = %state.phase, "Nothing to resume");
            return Ok(state);
        }

        match (state.failure, state.failed_phase) {
            (Some(FailureType::Recoverable), Some(failed_phase)) => {
                state.phase = Phase::Active(failed_phase);
                state.failure = None;
                state.failed_phase = None;
                state.failure_reason = None;
                state.updated_at = Utc::now();
                self.store.write(&state).await?;
                self.events.reset_unique_events();
                info!(workflow_id = %state.workflow_id, phase = %failed_phase, "Resuming failed workflow");
                Ok(state)
            }
            (Some(FailureType::Fatal), _) => Err(FlowError::ResumeRejected {
                reason: "the failure is fatal; only a restart is possible".to_string(),
            }),
            _ => Err(FlowError::ResumeRejected {
                reason: "the failed phase was not recorded".to_string(),
            }),
        }
    }

    /// Mark the running workflow as recoverably failed and interrupt its tick
    pub async fn force_recoverable_failure(
        &self,
        reason: &str,
    ) -> Result<Option<OfframpingState>, FlowError> {
        let _write = self.write_lock.lock().await;
        let Some(state) = self.store.read().await? else {
            return Ok(None);
        };
        let Some(phase) = state.current_phase() else {
            return Ok(Some(state));
        };

        self.cancel_workflow(&state.workflow_id);
        let failed = state.into_failure(phase, FailureType::Recoverable, reason.to_string());
        self.store.write(&failed).await?;
        self.metrics.record_recoverable_failure();
        warn!(workflow_id = %failed.workflow_id, phase = %phase, reason, "Forced recoverable failure");
        self.events.track(FlowEvent::TransactionFailure {
            workflow_id: failed.workflow_id.clone(),
            failed_phase: phase,
            failure: FailureType::Recoverable,
            reason: reason.to_string(),
        });
        Ok(Some(failed))
    }

    /// Drop the workflow and stop anything still working on it
    pub async fn clear_offramping_state(&self) -> Result<(), FlowError> {
        let _write = self.write_lock.lock().await;
        if let Some(state) = self.store.read().await? {
            self.cancel_workflow(&state.workflow_id);
            info!(workflow_id = %state.workflow_id, phase = %state.phase, "Clearing offramping state");
        }
        self.store.clear().await?;
        self.events.reset_unique_events();
        Ok(())
    }

    fn workflow_token(&self, workflow_id: &str) -> CancellationToken {
        let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens.retain(|_, token| !token.is_cancelled());
        tokens
            .entry(workflow_id.to_string())
            .or_insert_with(|| self.shutdown.child_token())
            .clone()
    }

    fn cancel_workflow(&self, workflow_id: &str) {
        let token = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(workflow_id);
        if let Some(token) = token {
            debug!(workflow_id, "Cancelling in-flight work");
            token.cancel();
        }
    }
}
