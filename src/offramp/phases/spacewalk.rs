use tokio_util::sync::CancellationToken;
use tracing::info;

use super::PhaseContext;
use crate::clients::{ChainCall, Signer};
use crate::offramp::polling::poll_until;
use crate::offramp::recovery::FlowError;
use crate::offramp::state::{write_once, OfframpingPhase, OfframpingState};
use crate::tokens::Chain;

/// Redeem the wrapped output token through the Spacewalk vault to the Stellar ephemeral account
pub(super) async fn execute_spacewalk_redeem(
    ctx: &PhaseContext,
    state: &mut OfframpingState,
    cancel: &CancellationToken,
) -> Result<(), FlowError> {
    let output = state.output_token_type;
    let owner = state.pendulum_ephemeral_address()?.to_string();
    let stellar_account = state.stellar_ephemeral_account()?.to_string();
    let stellar_asset = output.stellar_asset();
    let expected = state.amount_out_stellar_raw()?;

    let hash = ctx
        .submit(
            state,
            OfframpingPhase::ExecuteSpacewalkRedeem,
            "spacewalk-redeem",
            Chain::Pendulum,
            Signer::Ephemeral,
            ChainCall::SpacewalkRedeem {
                owner,
                vault_id: ctx.config.network.spacewalk_vault_id.clone(),
                asset: output.pendulum_asset(),
                amount: state.amount_out_pendulum_raw()?,
                stellar_destination: stellar_account.clone(),
                stellar_asset: stellar_asset.clone(),
            },
            cancel,
        )
        .await?;
    write_once(&mut state.outputs.spacewalk_redeem_hash, hash, "spacewalkRedeemHash")?;

    let stellar = ctx.clients.stellar.as_ref();
    let account = stellar_account.as_str();
    let asset = &stellar_asset;
    let polling = ctx.submitter.polling();
    let received = poll_until(
        "redeemed funds on Stellar",
        polling.arrival_interval(),
        polling.redeem_max_wait(),
        cancel,
        || async move {
            let balance = ctx.balance(stellar, account, asset).await?;
            Ok::<_, FlowError>((balance >= expected).then_some(balance))
        },
    )
    .await?;

    info!(
        workflow_id = %state.workflow_id,
        amount = %received,
        account = %stellar_account,
        "Redeemed funds arrived on Stellar"
    );
    Ok(())
}
