use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for the offramp engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OfframpConfig {
    /// Deployment environment
    pub environment: DeploymentEnvironment,
    /// Where the workflow state lives
    pub storage: StorageConfig,
    /// Fixed polling intervals and their bounds
    pub polling: PollingConfig,
    /// No-progress ceiling
    pub watchdog: WatchdogConfig,
    /// Fixed funding and subsidy constants
    pub funding: FundingConfig,
    /// Forex AMM settings
    pub swap: SwapConfig,
    /// Endpoints and well-known addresses
    pub network: NetworkConfig,
    /// Retry budget for transient client calls inside a phase
    pub retry: RetryConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Test switches
    pub test: TestConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentEnvironment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding the state file, recovery records and the lock file
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    /// Interval between anchor session polls
    pub anchor_interval_secs: u64,
    /// Give up waiting for the anchor session after this long
    pub anchor_max_wait_secs: u64,
    /// Interval between transaction status polls
    pub confirmation_interval_secs: u64,
    /// Give up waiting for a confirmation after this long
    pub confirmation_max_wait_secs: u64,
    /// Interval between balance polls while funds are in flight
    pub arrival_interval_secs: u64,
    /// Give up waiting for bridged funds after this long
    pub bridge_max_wait_secs: u64,
    /// Give up waiting for redeemed funds after this long
    pub redeem_max_wait_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchdogConfig {
    pub enabled: bool,
    /// Force a recoverable failure when no phase completed for this long
    pub ceiling_minutes: u64,
    pub check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FundingConfig {
    /// Pendulum account that funds ephemerals and receives sweeps
    pub pendulum_funding_account: String,
    /// Stellar account that funds ephemerals and receives merges
    pub stellar_funding_account: String,
    /// Minimum balance the Pendulum funding account must hold, in PEN
    pub pendulum_funding_minimum_units: String,
    /// Minimum balance the Stellar funding account must hold, in XLM
    pub stellar_funding_minimum_units: String,
    /// Sent to a new Pendulum ephemeral account, in PEN
    pub pendulum_ephemeral_starting_balance_units: String,
    /// Sent to a new Stellar ephemeral account, in XLM
    pub stellar_ephemeral_starting_balance_units: String,
    /// Native balance a Pendulum ephemeral must hold before each subsidized step, in PEN
    pub pendulum_fee_floor_units: String,
    /// Largest token shortfall a single subsidy may cover, in token units
    pub max_subsidy_units: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwapConfig {
    /// Swap deadline measured from workflow creation
    pub deadline_minutes: u64,
    /// Accepted slippage below the expected output, in basis points
    pub slippage_bps: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    pub squid_router_address: String,
    pub nabla_router_address: String,
    pub spacewalk_vault_id: String,
    /// Outbound RPC calls per second per client
    pub requests_per_second: u32,
    pub burst_capacity: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON lines instead of human readable output
    pub json_logs: bool,
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestConfig {
    /// Skip the anchor's minimum withdrawal check
    pub overwrite_minimum_transfer_amount: bool,
}

impl Default for OfframpConfig {
    fn default() -> Self {
        Self {
            environment: DeploymentEnvironment::Production,
            storage: StorageConfig {
                state_dir: PathBuf::from(".offramp"),
            },
            polling: PollingConfig {
                anchor_interval_secs: 20,
                anchor_max_wait_secs: 30 * 60,
                confirmation_interval_secs: 6,
                confirmation_max_wait_secs: 10 * 60,
                arrival_interval_secs: 10,
                bridge_max_wait_secs: 15 * 60,
                redeem_max_wait_secs: 15 * 60,
            },
            watchdog: WatchdogConfig {
                enabled: true,
                ceiling_minutes: 15,
                check_interval_secs: 30,
            },
            funding: FundingConfig {
                pendulum_funding_account: "6g7fKQQZ9VfbBTQSaKBcATV4psApFra5EDwKLARFZCCVnSWS".to_string(),
                stellar_funding_account: "GBHUSG5YMOSMEAD3UOWJ7HR3ROVTHK5ZLQJSVZ2HB4AKK4UXUPSNKE5D".to_string(),
                pendulum_funding_minimum_units: "10".to_string(),
                stellar_funding_minimum_units: "10".to_string(),
                pendulum_ephemeral_starting_balance_units: "0.1".to_string(),
                stellar_ephemeral_starting_balance_units: "2.5".to_string(),
                pendulum_fee_floor_units: "0.1".to_string(),
                max_subsidy_units: "5".to_string(),
            },
            swap: SwapConfig {
                deadline_minutes: 60 * 24 * 7, // 1 week
                slippage_bps: 50,
            },
            network: NetworkConfig {
                squid_router_address: "0xce16F69375520ab01377ce7B88f5BA8C48F8D666".to_string(),
                nabla_router_address: "6buMJsFCbXpHRyacKTjBn3Jss241b2aA7CZf9tKzKHMJWpcJ".to_string(),
                spacewalk_vault_id: "6g5dTZMWmbo3RYzWgGTHbzGbYjQPc9m8nzcHLxSRRQPrW8yf".to_string(),
                requests_per_second: 5,
                burst_capacity: 10,
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 500,
                max_delay_ms: 30_000,
                jitter: true,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
                metrics_enabled: true,
            },
            test: TestConfig {
                overwrite_minimum_transfer_amount: false,
            },
        }
    }
}

impl PollingConfig {
    pub fn anchor_interval(&self) -> Duration {
        Duration::from_secs(self.anchor_interval_secs)
    }

    pub fn anchor_max_wait(&self) -> Duration {
        Duration::from_secs(self.anchor_max_wait_secs)
    }

    pub fn confirmation_interval(&self) -> Duration {
        Duration::from_secs(self.confirmation_interval_secs)
    }

    pub fn confirmation_max_wait(&self) -> Duration {
        Duration::from_secs(self.confirmation_max_wait_secs)
    }

    pub fn arrival_interval(&self) -> Duration {
        Duration::from_secs(self.arrival_interval_secs)
    }

    pub fn bridge_max_wait(&self) -> Duration {
        Duration::from_secs(self.bridge_max_wait_secs)
    }

    pub fn redeem_max_wait(&self) -> Duration {
        Duration::from_secs(self.redeem_max_wait_secs)
    }
}

impl WatchdogConfig {
    pub fn ceiling(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.ceiling_minutes as i64)
    }
}

impl OfframpConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (offramp.toml)
    /// 3. Environment variables (prefixed with OFFRAMP_)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("offramp.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("OFFRAMP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let offramp_config: OfframpConfig = config.try_deserialize()?;
        Ok(offramp_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    /// Short waits for the in-memory sandbox. Intervals stay non-zero so paused-clock tests advance.
    pub fn for_sandbox(mut self) -> Self {
        self.polling = PollingConfig {
            anchor_interval_secs: 1,
            anchor_max_wait_secs: 30,
            confirmation_interval_secs: 1,
            confirmation_max_wait_secs: 30,
            arrival_interval_secs: 1,
            bridge_max_wait_secs: 30,
            redeem_max_wait_secs: 30,
        };
        self.retry.base_delay_ms = 1;
        self.retry.max_delay_ms = 5;
        self.retry.jitter = false;
        self.network.requests_per_second = 10_000;
        self.network.burst_capacity = 10_000;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_carry_reference_constants() {
        let config = OfframpConfig::default();
        assert_eq!(config.polling.anchor_interval_secs, 20);
        assert_eq!(config.watchdog.ceiling_minutes, 15);
        assert_eq!(config.funding.stellar_ephemeral_starting_balance_units, "2.5");
        assert_eq!(config.funding.pendulum_ephemeral_starting_balance_units, "0.1");
        assert_eq!(config.swap.deadline_minutes, 10_080);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offramp.toml");
        let mut config = OfframpConfig::default();
        config.swap.slippage_bps = 125;
        config.storage.state_dir = dir.path().join("state");
        config.save_to_file(&path).unwrap();

        let loaded = OfframpConfig::load_from(&path).unwrap();
        assert_eq!(loaded.swap.slippage_bps, 125);
        assert_eq!(loaded.storage.state_dir, dir.path().join("state"));
        assert_eq!(loaded.polling.anchor_interval_secs, 20);
    }

    #[test]
    fn test_unknown_keys_in_file_are_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offramp.toml");
        std::fs::write(
            &path,
            "[network]\nhorizon_url = \"https://horizon.stellar.org\"\nrequests_per_second = 2\n\n[test]\nmock_sep24 = true\n",
        )
        .unwrap();

        let loaded = OfframpConfig::load_from(&path).unwrap();
        assert_eq!(loaded.network.requests_per_second, 2);
        assert!(!loaded.test.overwrite_minimum_transfer_amount);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let loaded = OfframpConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.environment, DeploymentEnvironment::Production);
    }
}
