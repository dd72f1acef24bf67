use anyhow::Result;
use std::sync::Arc;

use crate::config::OfframpConfig;
use crate::offramp::{FileSystemStore, OfframpingState, ProgressView, StateStore};

pub mod clear;
pub mod config;
pub mod phases;
pub mod simulate;
pub mod status;

pub fn open_store(config: &OfframpConfig) -> Arc<dyn StateStore> {
    Arc::new(FileSystemStore::new(config.storage.state_dir.clone()))
}

pub fn print_progress(state: &OfframpingState) {
    let view = ProgressView::from_state(state);
    println!("🆔 Workflow:  {}", view.workflow_id);
    println!("🔗 Session:   {}", view.sep24_id);
    println!("📍 Phase:     {}", view.phase);
    println!("💬 {}", view.message);
    if let Some(reason) = &view.failure_reason {
        println!("❗ Reason:    {reason}");
    }
    if let Some(recovery) = view.recovery {
        if recovery.can_continue {
            println!("   ▶️  Continue: resume the failed phase");
        }
        if recovery.can_restart {
            println!("   🔁 Try again: clear and start a new offramp");
        }
    }
}

pub fn show_how_to_get_started() -> Result<()> {
    println!("💸 Pendulum Offramp");
    println!();
    println!("Commands:");
    println!("  📊 offramp status     # Show the persisted workflow");
    println!("  🧭 offramp phases     # List the offramp phases");
    println!("  🧪 offramp simulate   # Full run on the sandbox networks");
    println!("  🧹 offramp clear      # Drop the persisted workflow");
    println!("  ⚙️  offramp config     # Print the effective configuration");
    println!();
    println!("💡 Start with 'offramp simulate' to watch a complete offramp.");
    Ok(())
}
