use anyhow::Result;
use clap::Parser;

use pendulum_offramp::cli::commands::{
    clear::ClearCommand, config::ConfigCommand, phases::PhasesCommand, show_how_to_get_started,
    simulate::SimulateCommand, status::StatusCommand,
};
use pendulum_offramp::cli::{Cli, Commands};
use pendulum_offramp::config::OfframpConfig;
use pendulum_offramp::telemetry::{init_telemetry, shutdown_telemetry};

fn main() -> Result<()> {
    let cli = Cli::parse();

    OfframpConfig::load_env_file()?;
    let mut config = OfframpConfig::load_from(&cli.config)?;
    if let Some(state_dir) = cli.state_dir {
        config.storage.state_dir = state_dir;
    }

    tokio::runtime::Runtime::new()?.block_on(async {
        init_telemetry(&config.observability)?;
        let result = match cli.command {
            None => show_how_to_get_started(),
            Some(Commands::Status) => StatusCommand::new(config).execute().await,
            Some(Commands::Phases) => PhasesCommand::new().execute().await,
            Some(Commands::Clear { force }) => {
                ClearCommand::new(config).with_force(force).execute().await
            }
            Some(Commands::Simulate {
                amount,
                from,
                to,
                fail_at,
                fatal,
                resume,
            }) => {
                SimulateCommand::new(config, amount, &from, &to)?
                    .with_failure(fail_at.as_deref(), fatal, resume)?
                    .execute()
                    .await
            }
            Some(Commands::Config) => ConfigCommand::new(config).execute().await,
        };
        shutdown_telemetry();
        result
    })
}
