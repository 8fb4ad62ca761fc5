use crate::config::ConductorConfig;
use crate::error::{ConductorError, Result};
use crate::orchestrator::{Orchestrator, RunSummary};
use crate::reconcile::{reconcile, ReconciliationReport};
use crate::session::SessionStatus;
use crate::state::FileStateStore;
use crate::tracker::{HttpTrackerClient, TrackerClient};
use std::sync::Arc;

/// Execute the `run` command: drive an epic until its plan is exhausted.
///
/// Ctrl-C pauses every worker with a checkpoint, stops the run loop with its
/// worker tasks and kills all agent processes; the snapshot stays in the
/// store and its pause holds until `resume`.
pub async fn execute(
    config: Arc<ConductorConfig>,
    epic_id: &str,
    max_agents: Option<usize>,
    audit: bool,
) -> Result<RunSummary> {
    let config = match max_agents {
        Some(n) => {
            let config = (*config).clone().with_max_concurrent_agents(n);
            config.validate()?;
            Arc::new(config)
        }
        None => config,
    };

    let tracker = Arc::new(HttpTrackerClient::from_config(&config)?);
    let store = Arc::new(FileStateStore::new(config.state_path.clone()));
    let orchestrator = Orchestrator::new(config.clone(), tracker.clone(), store);

    let plan = tracker.execution_plan(epic_id).await?;
    println!(
        "Running epic {} ({}): {} item(s), {} worker(s)",
        plan.epic_id,
        plan.epic_name,
        plan.items().count(),
        config.max_concurrent_agents
    );

    let run = orchestrator.start(plan).await?;
    let handle = run.handle();
    let abort = run.abort_handle();

    let snapshot = handle.snapshot().await?;
    let held = snapshot.count(SessionStatus::Paused);
    if snapshot.global_pause || held > 0 {
        println!(
            "Saved pause in effect ({} worker(s) held); run `a3s-conductor resume` to continue.",
            held
        );
    }

    let mut summary = tokio::select! {
        summary = run.wait() => summary?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(epic = %epic_id, "Interrupted, pausing all workers");
            if let Err(e) = handle.pause(None, true).await {
                tracing::warn!(error = %e, "Pause on interrupt failed");
            }
            abort.abort();
            let killed = orchestrator.session_manager().destroy_all().await;
            tracing::info!(sessions = killed, "Agent processes stopped");
            return Err(ConductorError::Interrupted(format!(
                "epic {} paused with its checkpoint saved",
                epic_id
            )));
        }
    };

    print_summary(&summary);

    if audit && summary.finished {
        let report = reconcile(tracker.as_ref(), epic_id, &summary.outcomes).await?;
        print_reconciliation(&report);
        summary.reconciliation = Some(report);
    }
    Ok(summary)
}

fn print_summary(summary: &RunSummary) {
    let progress = &summary.progress;
    println!(
        "\nEpic {}: {} succeeded, {} failed, {} blocked, {} pending ({}%)",
        summary.epic_id,
        progress.succeeded,
        progress.failed,
        progress.blocked,
        progress.pending,
        progress.percent()
    );
    for outcome in summary.outcomes.iter().filter(|o| !o.success) {
        println!("  failed: {}", outcome.identifier);
    }
    if !summary.finished {
        println!("Run stopped before the plan was exhausted; its state is saved.");
    }
}

fn print_reconciliation(report: &ReconciliationReport) {
    println!(
        "\nReconciliation against {} feature(s), {} task(s):",
        report.total_features, report.total_tasks
    );
    if report.clean {
        println!("  clean");
        return;
    }
    for d in &report.discrepancies {
        println!(
            "  {} {}: expected {}, tracker says {}",
            d.kind, d.identifier, d.expected, d.actual
        );
    }
}
