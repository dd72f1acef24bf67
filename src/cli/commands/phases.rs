use anyhow::Result;

use crate::offramp::{phase_message, OfframpingPhase};

pub struct PhasesCommand;

impl PhasesCommand {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(&self) -> Result<()> {
        println!("🧭 OFFRAMP PHASES");
        println!("=================");
        for phase in OfframpingPhase::SEQUENCE {
            println!("   {:<24} {}", phase.as_str(), phase_message(phase));
        }
        println!("   {:<24} terminal", "success");
        println!("   {:<24} terminal, recoverable or fatal", "failure");
        Ok(())
    }
}

impl Default for PhasesCommand {
    fn default() -> Self {
        Self::new()
    }
}
