use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::PhaseContext;
use crate::clients::{ChainCall, Signer};
use crate::offramp::recovery::FlowError;
use crate::offramp::state::{write_once, OfframpingPhase, OfframpingState};
use crate::tokens::Chain;

pub(super) async fn nabla_approve(
    ctx: &PhaseContext,
    state: &mut OfframpingState,
    cancel: &CancellationToken,
) -> Result<(), FlowError> {
    let owner = state.pendulum_ephemeral_address()?.to_string();
    let hash = ctx
        .submit(
            state,
            OfframpingPhase::NablaApprove,
            "nabla-approve",
            Chain::Pendulum,
            Signer::Ephemeral,
            ChainCall::Approve {
                owner,
                spender: ctx.config.network.nabla_router_address.clone(),
                asset: state.input_token_type.pendulum_asset(),
                amount: state.amount_in_pendulum_raw()?,
            },
            cancel,
        )
        .await?;
    write_once(&mut state.outputs.nabla_approve_hash, hash, "nablaApproveHash")
}

pub(super) async fn nabla_swap(
    ctx: &PhaseContext,
    state: &mut OfframpingState,
    cancel: &CancellationToken,
) -> Result<(), FlowError> {
    let owner = state.pendulum_ephemeral_address()?.to_string();
    let asset_in = state.input_token_type.pendulum_asset();
    let asset_out = state.output_token_type.pendulum_asset();
    let amount_in = state.amount_in_pendulum_raw()?;
    let min_amount_out = state
        .amount_out_pendulum_raw()?
        .less_bps(ctx.config.swap.slippage_bps)?;
    let deadline = state.swap_deadline(ctx.config.swap.deadline_minutes);

    // A swap that was already sent must not be re-judged against today's price
    let swap_key = state.submission_key("nabla-swap");
    if !ctx.submitter.is_recorded(&swap_key).await? {
        let nabla = ctx.clients.nabla.as_ref();
        let quoted = ctx
            .submitter
            .retry()
            .execute_with_retry("nabla_quote", || nabla.quote(&asset_in, &asset_out, amount_in))
            .await
            .map_err(FlowError::client(Chain::Pendulum))?;
        if quoted < min_amount_out {
            warn!(
                workflow_id = %state.workflow_id,
                quoted = %quoted,
                minimum = %min_amount_out,
                "Swap quote below accepted minimum"
            );
            return Err(FlowError::QuoteBelowMinimum {
                quoted,
                minimum: min_amount_out,
            });
        }
    }

    let hash = ctx
        .submit(
            state,
            OfframpingPhase::NablaSwap,
            "nabla-swap",
            Chain::Pendulum,
            Signer::Ephemeral,
            ChainCall::NablaSwap {
                owner: owner.clone(),
                asset_in,
                asset_out: asset_out.clone(),
                amount_in,
                min_amount_out,
                deadline,
            },
            cancel,
        )
        .await?;
    write_once(&mut state.outputs.nabla_swap_hash, hash, "nablaSwapHash")?;

    // The ephemeral held none of the output token before the swap
    let output = ctx
        .balance(ctx.clients.pendulum.as_ref(), &owner, &asset_out)
        .await?;
    write_once(&mut state.outputs.nabla_swap_output, output, "nablaSwapOutput")?;
    info!(
        workflow_id = %state.workflow_id,
        amount_in = %amount_in,
        amount_out = %output,
        "Swap executed on Forex AMM"
    );
    Ok(())
}
