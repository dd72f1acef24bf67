use tokio_util::sync::CancellationToken;
use tracing::info;

use super::PhaseContext;
use crate::clients::{ChainCall, Signer};
use crate::offramp::events::{FlowEvent, SigningPhase};
use crate::offramp::polling::poll_until;
use crate::offramp::recovery::FlowError;
use crate::offramp::state::{write_once, OfframpingPhase, OfframpingState};
use crate::tokens::Chain;

const PHASE: OfframpingPhase = OfframpingPhase::SquidRouter;

/// Approve the router and bridge the input amount to the Pendulum ephemeral account
pub(super) async fn squid_router(
    ctx: &PhaseContext,
    state: &mut OfframpingState,
    cancel: &CancellationToken,
) -> Result<(), FlowError> {
    let input = state.input_token_type;
    let amount = state.amount_in_source_raw()?;
    let destination = state.pendulum_ephemeral_address()?.to_string();
    let source_asset = input.source_asset();

    ctx.emit(FlowEvent::SigningRequested {
        phase: SigningPhase::Started,
    });
    let approve_hash = ctx
        .submit(
            state,
            PHASE,
            "squidrouter-approve",
            Chain::Polygon,
            Signer::Wallet,
            ChainCall::Approve {
                owner: state.source_account.clone(),
                spender: ctx.config.network.squid_router_address.clone(),
                asset: source_asset.clone(),
                amount,
            },
            cancel,
        )
        .await?;
    write_once(
        &mut state.outputs.squid_router_approve_hash,
        approve_hash,
        "squidRouterApproveHash",
    )?;
    ctx.emit(FlowEvent::SigningRequested {
        phase: SigningPhase::Approved,
    });

    let swap_hash = ctx
        .submit(
            state,
            PHASE,
            "squidrouter-swap",
            Chain::Polygon,
            Signer::Wallet,
            ChainCall::SquidRouterBridge {
                from: state.source_account.clone(),
                asset: source_asset,
                amount,
                destination_chain: Chain::Pendulum,
                destination: destination.clone(),
                destination_asset: input.pendulum_asset(),
            },
            cancel,
        )
        .await?;
    write_once(
        &mut state.outputs.squid_router_swap_hash,
        swap_hash,
        "squidRouterSwapHash",
    )?;
    ctx.emit(FlowEvent::SigningRequested {
        phase: SigningPhase::Signed,
    });

    let pendulum = ctx.clients.pendulum.as_ref();
    let bridged_asset = input.pendulum_asset();
    let asset = &bridged_asset;
    let account = destination.as_str();
    let polling = ctx.submitter.polling();
    let arrived = poll_until(
        "bridged funds on Pendulum",
        polling.arrival_interval(),
        polling.bridge_max_wait(),
        cancel,
        || async move {
            let balance = ctx.balance(pendulum, account, asset).await?;
            Ok::<_, FlowError>((!balance.is_zero()).then_some(balance))
        },
    )
    .await?;
    write_once(
        &mut state.outputs.pendulum_bridged_amount,
        arrived,
        "pendulumBridgedAmount",
    )?;
    ctx.emit(FlowEvent::SigningRequested {
        phase: SigningPhase::Finished,
    });

    info!(
        workflow_id = %state.workflow_id,
        amount = %arrived,
        destination = %destination,
        "Bridged funds arrived on Pendulum"
    );
    Ok(())
}
