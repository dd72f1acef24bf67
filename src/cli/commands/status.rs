use anyhow::Result;

use super::{open_store, print_progress};
use crate::config::OfframpConfig;

pub struct StatusCommand {
    config: OfframpConfig,
}

impl StatusCommand {
    pub fn new(config: OfframpConfig) -> Self {
        Self { config }
    }

    pub async fn execute(&self) -> Result<()> {
        println!("📊 OFFRAMP STATUS");
        println!("=================");
        println!("📁 State directory: {}", self.config.storage.state_dir.display());
        println!();

        let store = open_store(&self.config);
        let Some(state) = store.read().await? else {
            println!("📭 No workflow stored");
            return Ok(());
        };

        print_progress(&state);
        println!();
        println!("💱 {} {} → {} {}", state.amount_in, state.input_token_type, state.amount_out, state.output_token_type);
        println!("🕒 Created {}, last progress {}", state.created_at, state.updated_at);

        let submissions: Vec<_> = store
            .list_submissions()
            .await?
            .into_iter()
            .filter(|s| s.workflow_id == state.workflow_id)
            .collect();
        if !submissions.is_empty() {
            println!();
            println!("🧾 SUBMISSIONS:");
            println!("───────────────");
            for submission in submissions {
                let hash = submission
                    .tx_hash
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| "(hash unknown)".to_string());
                println!("   {} [{}] {} → {}", submission.phase, submission.chain, submission.description, hash);
            }
        }
        Ok(())
    }
}
