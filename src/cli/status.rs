use crate::config::ConductorConfig;
use crate::error::{ConductorError, Result};
use crate::state::{FileStateStore, StateStore};

/// Execute the `status` command: print the persisted snapshot.
pub fn execute(config: &ConductorConfig) -> Result<()> {
    let store = FileStateStore::new(config.state_path.clone());
    let snapshot = store.load()?.ok_or_else(ConductorError::no_active_run)?;

    println!("Epic {} ({})", snapshot.epic_id, snapshot.epic_name);
    if let Some(paused_at) = snapshot.paused_at {
        println!("Paused since {}", paused_at.format("%Y-%m-%d %H:%M:%S"));
    }
    println!();
    println!(
        "{:<12} {:<12} {:<16} {:>8}  TITLE",
        "WORKER", "STATUS", "TASK", "PROGRESS"
    );
    for agent in &snapshot.agents {
        println!(
            "{:<12} {:<12} {:<16} {:>7}%  {}",
            agent.id,
            agent.status.to_string(),
            agent.task_id.as_deref().unwrap_or("-"),
            agent.progress,
            agent.task_title.as_deref().unwrap_or(""),
        );
    }

    let failed = snapshot.outcomes.iter().filter(|o| !o.success).count();
    println!(
        "\n{} completed, {} failed, last update {}",
        snapshot.completed.len(),
        failed,
        snapshot.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}
