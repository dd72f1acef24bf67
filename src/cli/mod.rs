use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "offramp")]
#[command(about = "Resumable cross-chain offramp state machine")]
#[command(long_about = "Moves a stablecoin from an EVM wallet through SquidRouter, the Pendulum Forex AMM \
                       and Spacewalk to a Stellar anchor. Progress is persisted after every phase so an \
                       interrupted offramp resumes where it stopped. Try 'offramp simulate' for a full \
                       run against the in-memory sandbox.")]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "offramp.toml")]
    pub config: PathBuf,

    /// Override the state directory from the configuration
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the persisted workflow, its progress message and recovery options
    Status,
    /// List the offramp phases in execution order
    Phases,
    /// Drop the persisted workflow and its submission records
    Clear {
        /// Clear even when the workflow has not finished
        #[arg(long, short = 'f', help = "Clear a workflow that is still in flight")]
        force: bool,
    },
    /// Run a complete offramp against the in-memory sandbox networks
    Simulate {
        /// Amount of the input token to offramp
        #[arg(long, default_value = "100.00")]
        amount: String,
        /// Input token on the source chain
        #[arg(long, default_value = "usdc", help = "Input token: usdc, usdce")]
        from: String,
        /// Output token paid out by the anchor
        #[arg(long, default_value = "eurc", help = "Output token: eurc, ars")]
        to: String,
        /// Take the network down once the workflow reaches this phase
        #[arg(long, help = "Phase name to inject a failure at, e.g. nablaSwap")]
        fail_at: Option<String>,
        /// Make the injected failure non-retriable
        #[arg(long, requires = "fail_at")]
        fatal: bool,
        /// Restore the network and resume after the injected failure
        #[arg(long, requires = "fail_at")]
        resume: bool,
    },
    /// Print the effective configuration
    Config,
}
