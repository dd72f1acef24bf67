use anyhow::{bail, Result};

use super::open_store;
use crate::config::OfframpConfig;

pub struct ClearCommand {
    config: OfframpConfig,
    force: bool,
}

impl ClearCommand {
    pub fn new(config: OfframpConfig) -> Self {
        Self {
            config,
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub async fn execute(&self) -> Result<()> {
        let store = open_store(&self.config);
        match store.read().await? {
            None => println!("✅ Nothing to clear"),
            Some(state) if !state.is_terminal() && !self.force => {
                bail!(
                    "workflow {} is still in phase {}; pass --force to clear it anyway",
                    state.workflow_id,
                    state.phase
                );
            }
            Some(state) => {
                store.clear().await?;
                println!("🧹 Cleared workflow {} ({})", state.workflow_id, state.phase);
            }
        }
        Ok(())
    }
}
