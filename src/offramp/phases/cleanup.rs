//! Sweeps of the ephemeral accounts back to the funding accounts

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::PhaseContext;
use crate::clients::{ChainCall, Signer};
use crate::offramp::recovery::FlowError;
use crate::offramp::state::{write_once, OfframpingPhase, OfframpingState};
use crate::tokens::{AssetId, Chain};

/// Move every non-zero balance of the Pendulum ephemeral to the funding account.
/// The native token goes last so the earlier sweeps can still pay fees.
pub(super) async fn pendulum_cleanup(
    ctx: &PhaseContext,
    state: &mut OfframpingState,
    cancel: &CancellationToken,
) -> Result<(), FlowError> {
    let pendulum = ctx.clients.pendulum.as_ref();
    let ephemeral = state.pendulum_ephemeral_address()?.to_string();
    let funding_account = ctx.config.funding.pendulum_funding_account.clone();
    let sweeps = [
        ("input", state.input_token_type.pendulum_asset()),
        ("output", state.output_token_type.pendulum_asset()),
        ("native", AssetId::native()),
    ];

    let mut hashes = Vec::new();
    for (label, asset) in sweeps {
        let balance = ctx.balance(pendulum, &ephemeral, &asset).await?;
        if balance.is_zero() {
            debug!(workflow_id = %state.workflow_id, asset = %asset, "Nothing to sweep");
            continue;
        }
        let hash = ctx
            .submit(
                state,
                OfframpingPhase::PendulumCleanup,
                &format!("pendulum-cleanup-{label}"),
                Chain::Pendulum,
                Signer::Ephemeral,
                ChainCall::TransferAll {
                    from: ephemeral.clone(),
                    to: funding_account.clone(),
                    asset: asset.clone(),
                },
                cancel,
            )
            .await?;
        info!(
            workflow_id = %state.workflow_id,
            asset = %asset,
            amount = %balance,
            "Swept Pendulum ephemeral balance"
        );
        hashes.push(hash);
    }

    write_once(&mut state.outputs.pendulum_cleanup_hashes, hashes, "pendulumCleanupHashes")
}

/// Return leftover tokens, then merge the Stellar ephemeral into the funding account
pub(super) async fn stellar_cleanup(
    ctx: &PhaseContext,
    state: &mut OfframpingState,
    cancel: &CancellationToken,
) -> Result<(), FlowError> {
    let stellar = ctx.clients.stellar.as_ref();
    let account = state.stellar_ephemeral_account()?.to_string();
    let prepared = state
        .outputs
        .prepared_stellar
        .clone()
        .ok_or_else(|| FlowError::missing_output("preparedStellar"))?;
    let token = state.output_token_type.stellar_asset();

    let mut hashes = Vec::new();
    let exists = ctx
        .submitter
        .retry()
        .execute_with_retry("account_exists", || stellar.account_exists(&account))
        .await
        .map_err(FlowError::client(Chain::Stellar))?;

    if exists {
        let dust = ctx.balance(stellar, &account, &token).await?;
        if !dust.is_zero() {
            let hash = ctx
                .submit(
                    state,
                    OfframpingPhase::StellarCleanup,
                    "stellar-cleanup-dust",
                    Chain::Stellar,
                    Signer::Ephemeral,
                    ChainCall::TransferAll {
                        from: account.clone(),
                        to: ctx.config.funding.stellar_funding_account.clone(),
                        asset: token.clone(),
                    },
                    cancel,
                )
                .await?;
            info!(workflow_id = %state.workflow_id, amount = %dust, "Returned Stellar token dust");
            hashes.push(hash);
        }
    }

    // Also covers a merge that landed before a crash: the lookup adopts it
    let merge_hash = ctx
        .submit_request(state, OfframpingPhase::StellarCleanup, &prepared.cleanup, cancel)
        .await?;
    hashes.push(merge_hash);
    info!(workflow_id = %state.workflow_id, account = %account, "Stellar ephemeral merged");

    write_once(&mut state.outputs.stellar_cleanup_hashes, hashes, "stellarCleanupHashes")
}
