//! One handler per phase
//!
//! Handlers receive a private copy of the state and record their outputs on it. The executor
//! advances the copy to the next phase only when the handler returned `Ok`, so the state the
//! driver passed in is never touched.

mod cleanup;
mod funding;
mod nabla;
mod prepare;
mod spacewalk;
mod squidrouter;
mod stellar;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::events::{EventTracker, FlowEvent};
use super::recovery::FlowError;
use super::state::{OfframpingPhase, OfframpingState};
use super::submission::Submitter;
use crate::amount::RawAmount;
use crate::clients::{ChainClient, ChainCall, NetworkClients, Signer, TransactionRequest, TxHash};
use crate::config::OfframpConfig;
use crate::ephemeral::EphemeralSecret;
use crate::tokens::{AssetId, Chain};

/// Everything a phase handler may talk to
pub struct PhaseContext {
    pub clients: NetworkClients,
    pub config: Arc<OfframpConfig>,
    pub submitter: Submitter,
    pub events: Arc<EventTracker>,
}

impl PhaseContext {
    /// Build, submit and confirm one step of the workflow
    async fn submit(
        &self,
        state: &OfframpingState,
        phase: OfframpingPhase,
        step: &str,
        chain: Chain,
        signer: Signer,
        call: ChainCall,
        cancel: &CancellationToken,
    ) -> Result<TxHash, FlowError> {
        let request = TransactionRequest::new(state.submission_key(step), chain, signer, call);
        self.submit_request(state, phase, &request, cancel).await
    }

    /// Submit a request that was built ahead of time
    async fn submit_request(
        &self,
        state: &OfframpingState,
        phase: OfframpingPhase,
        request: &TransactionRequest,
        cancel: &CancellationToken,
    ) -> Result<TxHash, FlowError> {
        let client = self.clients.for_chain(request.chain);
        let signing_key = match request.signer {
            Signer::Ephemeral => Some(ephemeral_key(state, request.chain)?),
            Signer::Wallet | Signer::Funding => None,
        };
        self.submitter
            .submit_once(
                client.as_ref(),
                &state.workflow_id,
                phase,
                request,
                signing_key,
                cancel,
            )
            .await
    }

    async fn balance(
        &self,
        client: &dyn ChainClient,
        account: &str,
        asset: &AssetId,
    ) -> Result<RawAmount, FlowError> {
        self.submitter
            .retry()
            .execute_with_retry("balance", || client.balance(account, asset))
            .await
            .map_err(FlowError::client(client.chain()))
    }

    fn emit(&self, event: FlowEvent) {
        self.events.track(event);
    }
}

fn ephemeral_key(state: &OfframpingState, chain: Chain) -> Result<&EphemeralSecret, FlowError> {
    match chain {
        Chain::Pendulum => Ok(&state.pendulum_ephemeral_seed),
        Chain::Stellar => Ok(&state.stellar_ephemeral_secret),
        Chain::Polygon => Err(FlowError::InvariantViolation {
            reason: "no ephemeral account exists on the source chain".to_string(),
        }),
    }
}

pub struct PhaseExecutor {
    ctx: PhaseContext,
}

impl PhaseExecutor {
    pub fn new(ctx: PhaseContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PhaseContext {
        &self.ctx
    }

    /// Run the current phase and return the state advanced past it
    pub async fn execute(
        &self,
        state: &OfframpingState,
        cancel: &CancellationToken,
    ) -> Result<OfframpingState, FlowError> {
        let phase = state.current_phase().ok_or_else(|| FlowError::InvariantViolation {
            reason: format!("cannot execute terminal phase {}", state.phase),
        })?;
        debug!(workflow_id = %state.workflow_id, phase = %phase, "Executing phase");

        let mut next = state.clone();
        let ctx = &self.ctx;
        match phase {
            OfframpingPhase::PrepareTransactions => {
                prepare::prepare_transactions(ctx, &mut next, cancel).await?
            }
            OfframpingPhase::SquidRouter => squidrouter::squid_router(ctx, &mut next, cancel).await?,
            OfframpingPhase::PendulumFundEphemeral => {
                funding::pendulum_fund_ephemeral(ctx, &mut next, cancel).await?
            }
            OfframpingPhase::SubsidizePreSwap => {
                funding::subsidize_pre_swap(ctx, &mut next, cancel).await?
            }
            OfframpingPhase::NablaApprove => nabla::nabla_approve(ctx, &mut next, cancel).await?,
            OfframpingPhase::NablaSwap => nabla::nabla_swap(ctx, &mut next, cancel).await?,
            OfframpingPhase::SubsidizePostSwap => {
                funding::subsidize_post_swap(ctx, &mut next, cancel).await?
            }
            OfframpingPhase::ExecuteSpacewalkRedeem => {
                spacewalk::execute_spacewalk_redeem(ctx, &mut next, cancel).await?
            }
            OfframpingPhase::PendulumCleanup => {
                cleanup::pendulum_cleanup(ctx, &mut next, cancel).await?
            }
            OfframpingPhase::StellarOfframp => stellar::stellar_offramp(ctx, &mut next, cancel).await?,
            OfframpingPhase::StellarCleanup => cleanup::stellar_cleanup(ctx, &mut next, cancel).await?,
        }

        let advanced = next.advanced_to(phase.next());
        info!(
            workflow_id = %advanced.workflow_id,
            completed = %phase,
            next = %advanced.phase,
            "Phase completed"
        );
        Ok(advanced)
    }
}
