//! Pause / resume decisions
//!
//! The same rules apply to a live run (through the run loop) and to the
//! persisted snapshot. A run in another process picks up snapshot edits
//! through [`external_requests`].

use crate::error::{ConductorError, Result};
use crate::session::{AgentSummary, SessionStatus};
use crate::state::{SessionSnapshot, StateStore};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which workers a pause or resume applies to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlPlan {
    pub targets: Vec<String>,
    /// Workers left as they are, with the reason status
    pub skipped: Vec<(String, SessionStatus)>,
}

fn find<'a>(agents: &'a [AgentSummary], worker_id: &str) -> Result<&'a AgentSummary> {
    agents.iter().find(|a| a.id == worker_id).ok_or_else(|| {
        ConductorError::unknown_worker(worker_id, agents.iter().map(|a| a.id.clone()).collect())
    })
}

/// Decide a pause. With a worker id only that worker is considered;
/// without one every idle or working agent is.
pub fn plan_pause(agents: &[AgentSummary], worker_id: Option<&str>) -> Result<ControlPlan> {
    let mut plan = ControlPlan::default();
    let candidates: Vec<&AgentSummary> = match worker_id {
        Some(id) => vec![find(agents, id)?],
        None => agents.iter().collect(),
    };
    for agent in candidates {
        match agent.status {
            SessionStatus::Idle | SessionStatus::Working => plan.targets.push(agent.id.clone()),
            other => plan.skipped.push((agent.id.clone(), other)),
        }
    }
    Ok(plan)
}

/// Decide a resume: paused agents only
pub fn plan_resume(agents: &[AgentSummary], worker_id: Option<&str>) -> Result<ControlPlan> {
    let mut plan = ControlPlan::default();
    let candidates: Vec<&AgentSummary> = match worker_id {
        Some(id) => vec![find(agents, id)?],
        None => agents.iter().collect(),
    };
    for agent in candidates {
        match agent.status {
            SessionStatus::Paused => plan.targets.push(agent.id.clone()),
            other => plan.skipped.push((agent.id.clone(), other)),
        }
    }
    Ok(plan)
}

/// Per-agent line of a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointAgent {
    pub id: String,
    pub task_id: Option<String>,
    pub progress: u8,
}

/// What `--save-state` records alongside the snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointSummary {
    pub epic_id: String,
    pub epic_name: String,
    pub agents: Vec<CheckpointAgent>,
    pub completed: Vec<String>,
    pub paused_at: Option<DateTime<Utc>>,
}

impl CheckpointSummary {
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        Self {
            epic_id: snapshot.epic_id.clone(),
            epic_name: snapshot.epic_name.clone(),
            agents: snapshot
                .agents
                .iter()
                .map(|a| CheckpointAgent {
                    id: a.id.clone(),
                    task_id: a.task_id.clone(),
                    progress: a.progress,
                })
                .collect(),
            completed: snapshot.completed.clone(),
            paused_at: snapshot.paused_at,
        }
    }

    pub fn log(&self) {
        let agents = self
            .agents
            .iter()
            .map(|a| {
                format!(
                    "{}:{}:{}%",
                    a.id,
                    a.task_id.as_deref().unwrap_or("-"),
                    a.progress
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        tracing::info!(
            epic = %self.epic_id,
            epic_name = %self.epic_name,
            agents = %agents,
            completed = %self.completed.join(","),
            paused_at = ?self.paused_at,
            "Checkpoint saved"
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PauseReport {
    pub paused: Vec<String>,
    pub already_paused: Vec<String>,
    pub not_running: Vec<(String, SessionStatus)>,
    pub checkpoint: Option<CheckpointSummary>,
}

impl PauseReport {
    pub fn from_plan(plan: &ControlPlan) -> Self {
        let mut report = Self {
            paused: plan.targets.clone(),
            ..Default::default()
        };
        for (id, status) in &plan.skipped {
            match status {
                SessionStatus::Paused => report.already_paused.push(id.clone()),
                other => report.not_running.push((id.clone(), *other)),
            }
        }
        report
    }

    /// Nothing was paused
    pub fn is_noop(&self) -> bool {
        self.paused.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResumeReport {
    pub resumed: Vec<String>,
    pub not_paused: Vec<(String, SessionStatus)>,
}

impl ResumeReport {
    pub fn from_plan(plan: &ControlPlan) -> Self {
        Self {
            resumed: plan.targets.clone(),
            not_paused: plan.skipped.clone(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.resumed.is_empty()
    }
}

/// A pause or resume recorded in the store by another process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Pause(Option<String>),
    Resume(Option<String>),
}

/// Requests implied by the difference between the snapshot a run last wrote
/// and the one the store holds now. Workers the run does not know are ignored.
pub fn external_requests(
    written: &SessionSnapshot,
    persisted: &SessionSnapshot,
) -> Vec<ControlRequest> {
    if persisted.global_pause != written.global_pause {
        return vec![if persisted.global_pause {
            ControlRequest::Pause(None)
        } else {
            ControlRequest::Resume(None)
        }];
    }
    persisted
        .agents
        .iter()
        .filter_map(|agent| {
            let was_paused = written.agent(&agent.id)?.status == SessionStatus::Paused;
            let is_paused = agent.status == SessionStatus::Paused;
            match (was_paused, is_paused) {
                (false, true) => Some(ControlRequest::Pause(Some(agent.id.clone()))),
                (true, false) => Some(ControlRequest::Resume(Some(agent.id.clone()))),
                _ => None,
            }
        })
        .collect()
}

/// Mark the planned agents paused in a persisted snapshot. Pausing every
/// worker also holds new assignments.
pub fn apply_pause(snapshot: &mut SessionSnapshot, plan: &ControlPlan, all: bool) {
    if plan.targets.is_empty() {
        return;
    }
    snapshot.global_pause |= all;
    for agent in snapshot
        .agents
        .iter_mut()
        .filter(|a| plan.targets.contains(&a.id))
    {
        agent.status = SessionStatus::Paused;
    }
    let now = Utc::now();
    snapshot.paused_at = Some(now);
    snapshot.updated_at = now;
}

/// Mark the planned agents working again in a persisted snapshot. Resuming
/// every worker lifts the hold on new assignments.
pub fn apply_resume(snapshot: &mut SessionSnapshot, plan: &ControlPlan, all: bool) {
    let lifted = all && snapshot.global_pause;
    if plan.targets.is_empty() && !lifted {
        return;
    }
    if all {
        snapshot.global_pause = false;
    }
    for agent in snapshot
        .agents
        .iter_mut()
        .filter(|a| plan.targets.contains(&a.id))
    {
        agent.status = SessionStatus::Working;
    }
    if snapshot.count(SessionStatus::Paused) == 0 {
        snapshot.paused_at = None;
    }
    snapshot.updated_at = Utc::now();
}

/// Pause workers recorded in `store`; saves only when something changed
pub fn pause_snapshot(
    store: &dyn StateStore,
    worker: Option<&str>,
    save_state: bool,
) -> Result<PauseReport> {
    let mut snapshot = store.load()?.ok_or_else(ConductorError::no_active_run)?;
    let plan = plan_pause(&snapshot.agents, worker)?;
    let mut report = PauseReport::from_plan(&plan);
    if !plan.targets.is_empty() {
        apply_pause(&mut snapshot, &plan, worker.is_none());
        store.save(&snapshot)?;
    }
    if save_state {
        let checkpoint = CheckpointSummary::from_snapshot(&snapshot);
        checkpoint.log();
        report.checkpoint = Some(checkpoint);
    }
    Ok(report)
}

/// Resume workers recorded in `store`; saves only when something changed
pub fn resume_snapshot(store: &dyn StateStore, worker: Option<&str>) -> Result<ResumeReport> {
    let mut snapshot = store.load()?.ok_or_else(ConductorError::no_active_run)?;
    let plan = plan_resume(&snapshot.agents, worker)?;
    if !plan.targets.is_empty() || (worker.is_none() && snapshot.global_pause) {
        apply_resume(&mut snapshot, &plan, worker.is_none());
        store.save(&snapshot)?;
    }
    Ok(ResumeReport::from_plan(&plan))
}
