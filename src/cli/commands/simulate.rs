use anyhow::{anyhow, bail, Result};
use std::sync::Arc;

use super::{open_store, print_progress};
use crate::anchor::OfframpOnboarding;
use crate::config::OfframpConfig;
use crate::offramp::{ExecutionInput, OfframpDriver, OfframpingPhase, Phase, Watchdog};
use crate::sandbox::{Outage, SandboxAnchor, SandboxNetwork};
use crate::shutdown::ShutdownCoordinator;
use crate::tokens::{Chain, InputTokenType, OutputTokenType};

/// Wallet the sandbox seeds with input tokens
const SIMULATED_WALLET: &str = "0x5151515151515151515151515151515151515151";

/// The network a phase talks to first
fn chain_for_phase(phase: OfframpingPhase) -> Chain {
    match phase {
        OfframpingPhase::SquidRouter => Chain::Polygon,
        OfframpingPhase::StellarOfframp | OfframpingPhase::StellarCleanup => Chain::Stellar,
        OfframpingPhase::PrepareTransactions
        | OfframpingPhase::PendulumFundEphemeral
        | OfframpingPhase::SubsidizePreSwap
        | OfframpingPhase::NablaApprove
        | OfframpingPhase::NablaSwap
        | OfframpingPhase::SubsidizePostSwap
        | OfframpingPhase::ExecuteSpacewalkRedeem
        | OfframpingPhase::PendulumCleanup => Chain::Pendulum,
    }
}

pub struct SimulateCommand {
    config: OfframpConfig,
    amount: String,
    from: InputTokenType,
    to: OutputTokenType,
    fail_at: Option<OfframpingPhase>,
    fatal: bool,
    resume: bool,
}

impl SimulateCommand {
    pub fn new(config: OfframpConfig, amount: String, from: &str, to: &str) -> Result<Self> {
        Ok(Self {
            config: config.for_sandbox(),
            amount,
            from: from.parse().map_err(|e: String| anyhow!(e))?,
            to: to.parse().map_err(|e: String| anyhow!(e))?,
            fail_at: None,
            fatal: false,
            resume: false,
        })
    }

    pub fn with_failure(mut self, fail_at: Option<&str>, fatal: bool, resume: bool) -> Result<Self> {
        self.fail_at = match fail_at {
            None => None,
            Some(name) => match name.parse::<Phase>().map_err(|e| anyhow!(e))? {
                Phase::Active(phase) => Some(phase),
                Phase::Final(_) => bail!("cannot inject a failure at terminal phase {name}"),
            },
        };
        self.fatal = fatal;
        self.resume = resume;
        Ok(self)
    }

    pub async fn execute(&self) -> Result<()> {
        println!("🧪 SANDBOX OFFRAMP");
        println!("==================");
        println!("💱 {} {} → {}", self.amount, self.from, self.to);
        println!();

        let shutdown = ShutdownCoordinator::new();
        shutdown.install_signal_handlers()?;

        let network = SandboxNetwork::seeded(&self.config, SIMULATED_WALLET);
        let clients = network.clients().rate_limited(
            self.config.network.requests_per_second,
            self.config.network.burst_capacity,
        );
        let driver = Arc::new(OfframpDriver::with_shutdown(
            open_store(&self.config),
            clients,
            self.config.clone(),
            shutdown.token(),
        ));
        if self.config.watchdog.enabled {
            Watchdog::new(Arc::clone(&driver), &self.config.watchdog).spawn(shutdown.child_token());
        }

        let min_amount_out = self.quote_min_amount_out(&network).await?;
        let input = ExecutionInput {
            input_token_type: self.from,
            output_token_type: self.to,
            amount_in_units: self.amount.clone(),
            min_amount_out_units: min_amount_out,
            source_account: SIMULATED_WALLET.to_string(),
        };

        print!("🔐 Completing anchor session... ");
        std::io::Write::flush(&mut std::io::stdout())?;
        let onboarding = OfframpOnboarding::new(Arc::new(SandboxAnchor::new(1)), Arc::clone(&driver));
        let state = onboarding.start_offramp(input, &shutdown.child_token()).await?;
        println!("✅ workflow {}", state.workflow_id);
        println!();

        let outcome = match self.fail_at {
            None => driver.run_to_completion().await?,
            Some(target) => {
                self.run_until(&driver, target).await?;
                let chain = chain_for_phase(target);
                let outage = if self.fatal {
                    Outage::Rejecting(format!("{chain} rejected the transaction"))
                } else {
                    Outage::Unreachable
                };
                println!("💥 Injecting {outage:?} on {chain} at {target}");
                network.set_outage(chain, outage).await;
                let failed = driver.advance_offramping_state().await?;

                if self.resume {
                    if let Some(state) = &failed {
                        print_progress(state);
                        println!();
                    }
                    network.clear_outages().await;
                    println!("▶️  Network restored, resuming");
                    match driver.resume_failed_flow().await {
                        Ok(_) => driver.run_to_completion().await?,
                        Err(e) => {
                            println!("⛔ {e}");
                            driver.read_current_state().await?
                        }
                    }
                } else {
                    failed
                }
            }
        };

        println!();
        match &outcome {
            Some(state) => print_progress(state),
            None => println!("📭 No workflow stored"),
        }

        let stats = driver.metrics().get_stats();
        println!();
        println!("📈 Ticks: {}, phases completed: {}", stats.ticks, stats.phases_completed);
        println!(
            "🧾 Submissions: {} sent, {} adopted, {} duplicated",
            network.total_submissions().await,
            stats.reused_submissions,
            network.duplicate_submissions().await
        );
        if self.config.observability.metrics_enabled {
            driver.metrics().log_stats();
        }

        shutdown.shutdown();
        Ok(())
    }

    /// Minimum output the user accepts, from a fresh quote of the sandbox AMM
    async fn quote_min_amount_out(&self, network: &SandboxNetwork) -> Result<String> {
        let amount_in = crate::amount::RawAmount::from_units(
            &self.amount,
            self.from.details().pendulum_decimals,
        )?;
        let quoted = network
            .clients()
            .nabla
            .quote(&self.from.pendulum_asset(), &self.to.pendulum_asset(), amount_in)
            .await?;
        Ok(quoted.to_units(self.to.details().pendulum_decimals))
    }

    async fn run_until(&self, driver: &OfframpDriver, target: OfframpingPhase) -> Result<()> {
        loop {
            let state = driver
                .read_current_state()
                .await?
                .ok_or_else(|| anyhow!("workflow disappeared"))?;
            match state.current_phase() {
                Some(phase) if phase == target => return Ok(()),
                Some(_) => {
                    driver.advance_offramping_state().await?;
                }
                None => bail!("workflow ended in {} before reaching {target}", state.phase),
            }
        }
    }
}
