//! Funding of the Pendulum ephemeral account and the two subsidy phases
//!
//! Amounts come from fixed constants, never from fee quotes: the native balance is topped up to a
//! floor, and any token shortfall against the amount a later step needs is covered up to a limit.

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::PhaseContext;
use crate::amount::RawAmount;
use crate::clients::{ChainCall, Signer, TxHash};
use crate::offramp::recovery::FlowError;
use crate::offramp::state::{write_once, OfframpingPhase, OfframpingState};
use crate::tokens::{native_decimals, AssetId, Chain};

pub(super) async fn pendulum_fund_ephemeral(
    ctx: &PhaseContext,
    state: &mut OfframpingState,
    cancel: &CancellationToken,
) -> Result<(), FlowError> {
    let pendulum = ctx.clients.pendulum.as_ref();
    let ephemeral = state.pendulum_ephemeral_address()?.to_string();
    let funding = &ctx.config.funding;
    let required = RawAmount::from_units(
        &funding.pendulum_ephemeral_starting_balance_units,
        native_decimals(Chain::Pendulum),
    )?;

    let current = ctx.balance(pendulum, &ephemeral, &AssetId::native()).await?;
    if current >= required {
        info!(
            workflow_id = %state.workflow_id,
            balance = %current,
            "Pendulum ephemeral already funded"
        );
        return Ok(());
    }

    let hash = ctx
        .submit(
            state,
            OfframpingPhase::PendulumFundEphemeral,
            "pendulum-fund-ephemeral",
            Chain::Pendulum,
            Signer::Funding,
            ChainCall::Transfer {
                from: funding.pendulum_funding_account.clone(),
                to: ephemeral,
                asset: AssetId::native(),
                amount: required.saturating_sub(current),
            },
            cancel,
        )
        .await?;
    write_once(&mut state.outputs.pendulum_funding_hash, hash, "pendulumFundingHash")
}

pub(super) async fn subsidize_pre_swap(
    ctx: &PhaseContext,
    state: &mut OfframpingState,
    cancel: &CancellationToken,
) -> Result<(), FlowError> {
    let target = state.amount_in_pendulum_raw()?;
    let asset = state.input_token_type.pendulum_asset();
    let decimals = state.input_token_type.details().pendulum_decimals;
    let hashes = subsidize(
        ctx,
        state,
        OfframpingPhase::SubsidizePreSwap,
        "subsidize-pre-swap",
        &asset,
        decimals,
        target,
        cancel,
    )
    .await?;
    write_once(&mut state.outputs.pre_swap_subsidy_hashes, hashes, "preSwapSubsidyHashes")
}

pub(super) async fn subsidize_post_swap(
    ctx: &PhaseContext,
    state: &mut OfframpingState,
    cancel: &CancellationToken,
) -> Result<(), FlowError> {
    let target = state.amount_out_pendulum_raw()?;
    let asset = state.output_token_type.pendulum_asset();
    let decimals = state.output_token_type.details().pendulum_decimals;
    let hashes = subsidize(
        ctx,
        state,
        OfframpingPhase::SubsidizePostSwap,
        "subsidize-post-swap",
        &asset,
        decimals,
        target,
        cancel,
    )
    .await?;
    write_once(&mut state.outputs.post_swap_subsidy_hashes, hashes, "postSwapSubsidyHashes")
}

#[allow(clippy::too_many_arguments)]
async fn subsidize(
    ctx: &PhaseContext,
    state: &OfframpingState,
    phase: OfframpingPhase,
    step: &str,
    token: &AssetId,
    token_decimals: u32,
    target: RawAmount,
    cancel: &CancellationToken,
) -> Result<Vec<TxHash>, FlowError> {
    let pendulum = ctx.clients.pendulum.as_ref();
    let ephemeral = state.pendulum_ephemeral_address()?;
    let funding = &ctx.config.funding;
    let mut hashes = Vec::new();

    let fee_floor = RawAmount::from_units(
        &funding.pendulum_fee_floor_units,
        native_decimals(Chain::Pendulum),
    )?;
    let native = ctx.balance(pendulum, ephemeral, &AssetId::native()).await?;
    if native < fee_floor {
        let top_up = fee_floor.saturating_sub(native);
        let hash = ctx
            .submit(
                state,
                phase,
                &format!("{step}-native"),
                Chain::Pendulum,
                Signer::Funding,
                ChainCall::Transfer {
                    from: funding.pendulum_funding_account.clone(),
                    to: ephemeral.to_string(),
                    asset: AssetId::native(),
                    amount: top_up,
                },
                cancel,
            )
            .await?;
        info!(workflow_id = %state.workflow_id, amount = %top_up, "Native fee balance subsidized");
        hashes.push(hash);
    }

    let balance = ctx.balance(pendulum, ephemeral, token).await?;
    let shortfall = target.saturating_sub(balance);
    if !shortfall.is_zero() {
        let limit = RawAmount::from_units(&funding.max_subsidy_units, token_decimals)?;
        if shortfall > limit {
            return Err(FlowError::SubsidyLimitExceeded {
                required: shortfall,
                limit,
            });
        }
        let hash = ctx
            .submit(
                state,
                phase,
                &format!("{step}-token"),
                Chain::Pendulum,
                Signer::Funding,
                ChainCall::Transfer {
                    from: funding.pendulum_funding_account.clone(),
                    to: ephemeral.to_string(),
                    asset: token.clone(),
                    amount: shortfall,
                },
                cancel,
            )
            .await?;
        info!(
            workflow_id = %state.workflow_id,
            asset = %token,
            amount = %shortfall,
            "Token shortfall subsidized"
        );
        hashes.push(hash);
    }

    Ok(hashes)
}
