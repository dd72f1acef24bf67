use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    AnchorError, AnchorSessionAdapter, AnchorSessionParams, InteractiveSession, SessionResult,
    SessionStatus, TomlValues,
};
use crate::amount::truncate_units;
use crate::ephemeral::EphemeralSecret;
use crate::offramp::events::FlowEvent;
use crate::offramp::polling::poll_until;
use crate::offramp::recovery::FlowError;
use crate::offramp::state::{ExecutionInput, InitialStateParams, OfframpingState};
use crate::offramp::OfframpDriver;
use crate::tokens::Chain;

/// Poll the anchor until the user finished the interactive flow.
///
/// Transient anchor errors count as "still pending"; an expired or rejected session ends the wait.
pub async fn await_session_completion(
    adapter: &dyn AnchorSessionAdapter,
    session: &InteractiveSession,
    params: &AnchorSessionParams,
    interval: Duration,
    max_wait: Duration,
    cancel: &CancellationToken,
) -> Result<SessionResult, FlowError> {
    poll_until(
        "anchor session completion",
        interval,
        max_wait,
        cancel,
        || async move {
            match adapter.poll_session(session, params).await {
                Ok(SessionStatus::Completed(result)) => Ok(Some(result)),
                Ok(SessionStatus::Pending) => Ok(None),
                Err(e) if e.is_transient() => {
                    warn!(session_id = %session.id, error = %e, "Anchor poll failed, will retry");
                    Ok(None)
                }
                Err(e) => Err(FlowError::Anchor(e)),
            }
        },
    )
    .await
}

/// Runs the anchor handshake that precedes every workflow and seeds the initial state
pub struct OfframpOnboarding {
    adapter: Arc<dyn AnchorSessionAdapter>,
    driver: Arc<OfframpDriver>,
    toml_cache: Cache<String, TomlValues>,
}

impl OfframpOnboarding {
    pub fn new(adapter: Arc<dyn AnchorSessionAdapter>, driver: Arc<OfframpDriver>) -> Self {
        let toml_cache = Cache::builder()
            .max_capacity(16)
            .time_to_live(Duration::from_secs(300))
            .build();
        Self {
            adapter,
            driver,
            toml_cache,
        }
    }

    pub fn driver(&self) -> &Arc<OfframpDriver> {
        &self.driver
    }

    /// stellar.toml values of an anchor, cached for five minutes
    pub async fn fetch_toml(&self, toml_url: &str) -> Result<TomlValues, AnchorError> {
        if let Some(values) = self.toml_cache.get(toml_url).await {
            debug!(toml_url, "Anchor metadata cache hit");
            return Ok(values);
        }
        let values = self.adapter.fetch_session_metadata(toml_url).await?;
        self.toml_cache
            .insert(toml_url.to_string(), values.clone())
            .await;
        Ok(values)
    }

    /// Authenticate with the anchor, wait for the user to finish the interactive flow and
    /// persist the resulting workflow
    pub async fn start_offramp(
        &self,
        input: ExecutionInput,
        cancel: &CancellationToken,
    ) -> Result<OfframpingState, FlowError> {
        let config = self.driver.config();
        input.validate(!config.test.overwrite_minimum_transfer_amount)?;

        // Checked again when the state is persisted; failing here spares the anchor round-trips
        self.driver.ensure_nothing_stored().await?;

        let offramp_amount = truncate_units(&input.min_amount_out_units, 2)?;
        self.driver.events().track(FlowEvent::TransactionConfirmation {
            from_asset: input.input_token_type.to_string(),
            to_asset: input.output_token_type.to_string(),
            from_amount: input.amount_in_units.clone(),
            to_amount: offramp_amount.clone(),
        });

        let stellar_ephemeral_secret = EphemeralSecret::generate();
        let pendulum_ephemeral_seed = EphemeralSecret::generate();
        let stellar_account = self
            .driver
            .clients()
            .stellar
            .derive_address(&stellar_ephemeral_secret)
            .map_err(FlowError::client(Chain::Stellar))?;

        let output = input.output_token_type;
        let toml_values = self.fetch_toml(output.details().toml_url).await?;
        let token = self
            .adapter
            .authorize(&toml_values, &stellar_ephemeral_secret, &stellar_account)
            .await?;

        let params = AnchorSessionParams {
            token,
            toml_values,
            output_token: output,
            offramp_amount,
            stellar_account,
        };
        let session = self.adapter.open_interactive_session(&params).await?;
        info!(session_id = %session.id, "Anchor interactive session opened");
        self.driver.events().track(FlowEvent::InteractiveSessionOpened {
            id: session.id.clone(),
            url: session.url.clone(),
        });

        let result = await_session_completion(
            self.adapter.as_ref(),
            &session,
            &params,
            config.polling.anchor_interval(),
            config.polling.anchor_max_wait(),
            cancel,
        )
        .await?;

        let state = self
            .driver
            .construct_initial_state(InitialStateParams {
                sep24_id: session.id,
                stellar_ephemeral_secret,
                pendulum_ephemeral_seed,
                execution_input: input,
                session_result: result,
            })
            .await?;
        self.driver.events().track(FlowEvent::KycCompleted {
            workflow_id: state.workflow_id.clone(),
        });
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::{MockAnchorSessionAdapter, SessionToken};
    use crate::config::OfframpConfig;
    use crate::offramp::persistence::InMemoryStore;
    use crate::offramp::recovery::classify;
    use crate::offramp::state::{FailureType, Phase};
    use crate::sandbox::SandboxNetwork;
    use crate::tokens::{InputTokenType, OutputTokenType};

    const USER: &str = "0x1111111111111111111111111111111111111111";

    fn toml() -> TomlValues {
        TomlValues {
            signing_key: "GSIGNER".to_string(),
            web_auth_endpoint: "https://anchor.example/auth".to_string(),
            sep24_url: "https://anchor.example/sep24".to_string(),
        }
    }

    fn params() -> AnchorSessionParams {
        AnchorSessionParams {
            token: SessionToken::new("jwt"),
            toml_values: toml(),
            output_token: OutputTokenType::Eurc,
            offramp_amount: "95.00".to_string(),
            stellar_account: "GEPHEMERAL".to_string(),
        }
    }

    fn session() -> InteractiveSession {
        InteractiveSession {
            id: "sep24-1".to_string(),
            url: "https://anchor.example/interactive".to_string(),
        }
    }

    fn completed() -> SessionResult {
        SessionResult {
            amount: "95.00".to_string(),
            memo: "memo-1".to_string(),
            memo_type: "text".to_string(),
            offramping_account: "GANCHOR".to_string(),
        }
    }

    fn input() -> ExecutionInput {
        ExecutionInput {
            input_token_type: InputTokenType::Usdc,
            output_token_type: OutputTokenType::Eurc,
            amount_in_units: "100.00".to_string(),
            min_amount_out_units: "95.2379".to_string(),
            source_account: USER.to_string(),
        }
    }

    fn happy_adapter() -> MockAnchorSessionAdapter {
        let mut adapter = MockAnchorSessionAdapter::new();
        adapter
            .expect_fetch_session_metadata()
            .returning(|_| Ok(toml()));
        adapter
            .expect_authorize()
            .returning(|_, _, _| Ok(SessionToken::new("jwt")));
        adapter
            .expect_open_interactive_session()
            .returning(|_| Ok(session()));
        adapter
            .expect_poll_session()
            .returning(|_, _| Ok(SessionStatus::Completed(completed())));
        adapter
    }

    fn driver() -> Arc<OfframpDriver> {
        let config = OfframpConfig::default().for_sandbox();
        let network = SandboxNetwork::seeded(&config, USER);
        Arc::new(OfframpDriver::new(
            Arc::new(InMemoryStore::new()),
            network.clients(),
            config,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_completion_rides_out_pending_and_transient_errors() {
        let mut adapter = MockAnchorSessionAdapter::new();
        let mut seq = mockall::Sequence::new();
        adapter
            .expect_poll_session()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(SessionStatus::Pending));
        adapter
            .expect_poll_session()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(AnchorError::Network("connection reset".to_string())));
        adapter
            .expect_poll_session()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(SessionStatus::Completed(completed())));

        let result = await_session_completion(
            &adapter,
            &session(),
            &params(),
            Duration::from_secs(20),
            Duration::from_secs(600),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result, completed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_is_fatal() {
        let mut adapter = MockAnchorSessionAdapter::new();
        adapter
            .expect_poll_session()
            .returning(|_, _| Err(AnchorError::SessionExpired));

        let err = await_session_completion(
            &adapter,
            &session(),
            &params(),
            Duration::from_secs(20),
            Duration::from_secs(600),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FlowError::Anchor(AnchorError::SessionExpired)));
        assert_eq!(classify(&err), FailureType::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_that_never_completes_times_out() {
        let mut adapter = MockAnchorSessionAdapter::new();
        adapter
            .expect_poll_session()
            .returning(|_, _| Ok(SessionStatus::Pending));

        let err = await_session_completion(
            &adapter,
            &session(),
            &params(),
            Duration::from_secs(20),
            Duration::from_secs(100),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FlowError::ConditionTimeout { .. }));
        assert_eq!(classify(&err), FailureType::Recoverable);
    }

    #[tokio::test]
    async fn test_start_offramp_persists_initial_state() {
        let driver = driver();
        let onboarding = OfframpOnboarding::new(Arc::new(happy_adapter()), Arc::clone(&driver));

        let state = onboarding
            .start_offramp(input(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state.phase, Phase::Active(crate::offramp::OfframpingPhase::PrepareTransactions));
        assert_eq!(state.sep24_id, "sep24-1");
        assert_eq!(state.amount_out, "95.23");
        assert_eq!(state.sep_result, completed());
        assert_ne!(state.stellar_ephemeral_secret, state.pendulum_ephemeral_seed);

        let stored = driver.read_current_state().await.unwrap().unwrap();
        assert_eq!(stored, state);
    }

    #[tokio::test]
    async fn test_start_offramp_refuses_while_workflow_in_flight() {
        let driver = driver();
        let onboarding = OfframpOnboarding::new(Arc::new(happy_adapter()), Arc::clone(&driver));
        let first = onboarding
            .start_offramp(input(), &CancellationToken::new())
            .await
            .unwrap();

        let err = onboarding
            .start_offramp(input(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::AlreadyInFlight { workflow_id } if workflow_id == first.workflow_id));
    }

    #[tokio::test]
    async fn test_failed_workflow_blocks_new_session_until_cleared() {
        let driver = driver();
        let onboarding = OfframpOnboarding::new(Arc::new(happy_adapter()), Arc::clone(&driver));
        let first = onboarding
            .start_offramp(input(), &CancellationToken::new())
            .await
            .unwrap();
        driver.force_recoverable_failure("rpc down").await.unwrap();

        // No expectations: the anchor must not be contacted
        let blocked = OfframpOnboarding::new(
            Arc::new(MockAnchorSessionAdapter::new()),
            Arc::clone(&driver),
        );
        let err = blocked
            .start_offramp(input(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::AlreadyInFlight { ref workflow_id } if *workflow_id == first.workflow_id));

        driver.clear_offramping_state().await.unwrap();
        let second = onboarding
            .start_offramp(input(), &CancellationToken::new())
            .await
            .unwrap();
        assert_ne!(second.workflow_id, first.workflow_id);
    }

    #[tokio::test]
    async fn test_invalid_input_touches_nothing() {
        let driver = driver();
        // No expectations: any adapter call would panic
        let onboarding = OfframpOnboarding::new(
            Arc::new(MockAnchorSessionAdapter::new()),
            Arc::clone(&driver),
        );
        let mut bad = input();
        bad.amount_in_units = "-5".to_string();

        let err = onboarding
            .start_offramp(bad, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Validation(_)));
        assert!(driver.read_current_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_toml_is_cached() {
        let mut adapter = MockAnchorSessionAdapter::new();
        adapter
            .expect_fetch_session_metadata()
            .times(1)
            .returning(|_| Ok(toml()));
        let onboarding = OfframpOnboarding::new(Arc::new(adapter), driver());

        let url = OutputTokenType::Eurc.details().toml_url;
        assert_eq!(onboarding.fetch_toml(url).await.unwrap(), toml());
        assert_eq!(onboarding.fetch_toml(url).await.unwrap(), toml());
    }
}
