use crate::config::ConductorConfig;
use crate::error::Result;
use crate::orchestrator::control;
use crate::state::FileStateStore;

/// Execute the `resume` command against the persisted run.
pub fn execute(config: &ConductorConfig, worker: Option<&str>) -> Result<()> {
    let store = FileStateStore::new(config.state_path.clone());
    let report = control::resume_snapshot(&store, worker)?;

    if report.is_noop() {
        println!("Nothing to resume.");
    }
    for id in &report.resumed {
        println!("Resumed {}", id);
    }
    for (id, status) in &report.not_paused {
        println!("{} is not paused ({})", id, status);
    }
    if !report.is_noop() {
        println!(
            "A live run picks this up within {}ms; otherwise `a3s-conductor run --epic <id>` continues the plan.",
            config.state_poll_ms
        );
    }
    Ok(())
}
