use tokio_util::sync::CancellationToken;
use tracing::info;

use super::PhaseContext;
use crate::amount::RawAmount;
use crate::clients::{ChainCall, ChainClient, Signer, TransactionRequest};
use crate::offramp::recovery::FlowError;
use crate::offramp::state::{write_once, OfframpingPhase, OfframpingState, PreparedStellarTransactions};
use crate::tokens::{native_decimals, AssetId, Chain};

const PHASE: OfframpingPhase = OfframpingPhase::PrepareTransactions;

pub(super) async fn prepare_transactions(
    ctx: &PhaseContext,
    state: &mut OfframpingState,
    cancel: &CancellationToken,
) -> Result<(), FlowError> {
    let pendulum = ctx.clients.pendulum.as_ref();
    let stellar = ctx.clients.stellar.as_ref();

    let pendulum_address = pendulum
        .derive_address(&state.pendulum_ephemeral_seed)
        .map_err(FlowError::client(Chain::Pendulum))?;
    let stellar_account = stellar
        .derive_address(&state.stellar_ephemeral_secret)
        .map_err(FlowError::client(Chain::Stellar))?;
    write_once(
        &mut state.outputs.pendulum_ephemeral_address,
        pendulum_address,
        "pendulumEphemeralAddress",
    )?;
    write_once(
        &mut state.outputs.stellar_ephemeral_account,
        stellar_account.clone(),
        "stellarEphemeralAccount",
    )?;

    let funding = &ctx.config.funding;
    ensure_funding_reserve(
        ctx,
        pendulum,
        &funding.pendulum_funding_account,
        &funding.pendulum_funding_minimum_units,
    )
    .await?;
    ensure_funding_reserve(
        ctx,
        stellar,
        &funding.stellar_funding_account,
        &funding.stellar_funding_minimum_units,
    )
    .await?;

    let output = state.output_token_type;
    let starting_balance = RawAmount::from_units(
        &funding.stellar_ephemeral_starting_balance_units,
        native_decimals(Chain::Stellar),
    )?;
    let creation_hash = ctx
        .submit(
            state,
            PHASE,
            "stellar-create-account",
            Chain::Stellar,
            Signer::Funding,
            ChainCall::CreateAccount {
                funder: funding.stellar_funding_account.clone(),
                account: stellar_account.clone(),
                starting_balance,
                trustline: Some(output.stellar_asset()),
            },
            cancel,
        )
        .await?;
    write_once(
        &mut state.outputs.stellar_account_creation_hash,
        creation_hash,
        "stellarAccountCreationHash",
    )?;

    let offramp = TransactionRequest::new(
        state.submission_key("stellar-offramp-payment"),
        Chain::Stellar,
        Signer::Ephemeral,
        ChainCall::StellarPayment {
            from: stellar_account.clone(),
            to: state.sep_result.offramping_account.clone(),
            asset: output.stellar_asset(),
            amount: state.amount_out_stellar_raw()?,
            memo: state.sep_result.memo.clone(),
            memo_type: state.sep_result.memo_type.clone(),
        },
    );
    let cleanup = TransactionRequest::new(
        state.submission_key("stellar-cleanup-merge"),
        Chain::Stellar,
        Signer::Ephemeral,
        ChainCall::AccountMerge {
            account: stellar_account.clone(),
            destination: funding.stellar_funding_account.clone(),
        },
    );
    write_once(
        &mut state.outputs.prepared_stellar,
        PreparedStellarTransactions { offramp, cleanup },
        "preparedStellar",
    )?;

    info!(
        workflow_id = %state.workflow_id,
        stellar_account = %stellar_account,
        "Ephemeral accounts prepared"
    );
    Ok(())
}

async fn ensure_funding_reserve(
    ctx: &PhaseContext,
    client: &dyn ChainClient,
    account: &str,
    minimum_units: &str,
) -> Result<(), FlowError> {
    let required = RawAmount::from_units(minimum_units, native_decimals(client.chain()))?;
    let available = ctx.balance(client, account, &AssetId::native()).await?;
    if available < required {
        return Err(FlowError::InsufficientFunds {
            account: account.to_string(),
            required,
            available,
        });
    }
    Ok(())
}
