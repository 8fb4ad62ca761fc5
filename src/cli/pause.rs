use crate::config::ConductorConfig;
use crate::error::Result;
use crate::orchestrator::{control, PauseReport};
use crate::state::FileStateStore;

/// Execute the `pause` command against the persisted run; a live `run`
/// process polls the same snapshot.
pub fn execute(config: &ConductorConfig, worker: Option<&str>, save_state: bool) -> Result<()> {
    let store = FileStateStore::new(config.state_path.clone());
    let report = control::pause_snapshot(&store, worker, save_state)?;
    print_report(&report);
    if !report.is_noop() {
        println!(
            "A live run applies this within {}ms; a restarted run keeps it until `a3s-conductor resume`.",
            config.state_poll_ms
        );
    }
    Ok(())
}

pub(crate) fn print_report(report: &PauseReport) {
    if report.is_noop() {
        println!("Nothing to pause.");
    }
    for id in &report.paused {
        println!("Paused {}", id);
    }
    for id in &report.already_paused {
        println!("{} is already paused", id);
    }
    for (id, status) in &report.not_running {
        println!("{} is not running ({})", id, status);
    }
    if let Some(checkpoint) = &report.checkpoint {
        println!(
            "\nCheckpoint for {} ({}): {} agent(s), {} completed item(s)",
            checkpoint.epic_id,
            checkpoint.epic_name,
            checkpoint.agents.len(),
            checkpoint.completed.len()
        );
    }
}
