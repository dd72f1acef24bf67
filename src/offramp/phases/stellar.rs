use tokio_util::sync::CancellationToken;
use tracing::info;

use super::PhaseContext;
use crate::offramp::recovery::FlowError;
use crate::offramp::state::{write_once, OfframpingPhase, OfframpingState};

/// Pay the anchor from the Stellar ephemeral account with the memo it asked for
pub(super) async fn stellar_offramp(
    ctx: &PhaseContext,
    state: &mut OfframpingState,
    cancel: &CancellationToken,
) -> Result<(), FlowError> {
    let prepared = state
        .outputs
        .prepared_stellar
        .clone()
        .ok_or_else(|| FlowError::missing_output("preparedStellar"))?;

    let hash = ctx
        .submit_request(state, OfframpingPhase::StellarOfframp, &prepared.offramp, cancel)
        .await?;
    info!(
        workflow_id = %state.workflow_id,
        sep24_id = %state.sep24_id,
        hash = %hash,
        "Offramp payment sent to anchor"
    );
    write_once(&mut state.outputs.stellar_offramp_hash, hash, "stellarOfframpHash")
}
