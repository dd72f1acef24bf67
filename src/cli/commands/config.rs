use anyhow::Result;

use crate::config::OfframpConfig;

pub struct ConfigCommand {
    config: OfframpConfig,
}

impl ConfigCommand {
    pub fn new(config: OfframpConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self) -> Result<()> {
        println!("# Effective offramp configuration");
        println!("{}", toml::to_string_pretty(&self.config)?);
        Ok(())
    }
}
