//! Orchestrator
//!
//! Drives an execution plan over a pool of worker slots (`worker-1` …
//! `worker-N`). A single run loop owns the scheduler, the slots and the
//! snapshot; worker tasks and control handles only talk to it through
//! channels, so assignment and persistence decisions are serialized without
//! locks. Nothing slow runs on the loop itself: tracker marks go through an
//! ordered lane task, and agent-side pause work is spawned.
//!
//! ```text
//! OrchestratorHandle ──Command──▶ ┌──────────┐ ──spawn──▶ worker task
//!   state store ◀──poll / save──▶ │ run loop │               │ create session
//!                                 └──────────┘ ◀─WorkerEvent─┘ send_and_wait
//!                                      │ Mark
//!                                      ▼
//!                                  mark lane ──▶ tracker
//! ```
//!
//! Another process controls a live run by editing the persisted snapshot
//! (`pause_snapshot` / `resume_snapshot`); the loop never overwrites such an
//! edit before applying it.

pub mod control;
pub mod prompt;
pub mod scheduler;

pub use control::{CheckpointSummary, ControlPlan, ControlRequest, PauseReport, ResumeReport};
pub use prompt::{DefaultPromptComposer, PromptComposer};
pub use scheduler::{ItemState, PlanProgress, Scheduler};

use crate::config::ConductorConfig;
use crate::error::{ConductorError, Result};
use crate::reconcile::{ExpectedItemResult, ReconciliationReport};
use crate::session::{AgentSession, AgentSummary, PendingPause, SessionManager, SessionStatus};
use crate::state::{SessionSnapshot, StateStore};
use crate::tracker::{Briefing, ExecutionPlan, ItemKind, PlanItem, TrackerClient};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub epic_id: String,
    pub outcomes: Vec<ExpectedItemResult>,
    pub progress: PlanProgress,
    /// False when the run stopped with items still pending
    pub finished: bool,
    /// Filled in by callers that audit the run
    pub reconciliation: Option<ReconciliationReport>,
}

enum Command {
    Pause {
        worker: Option<String>,
        save_state: bool,
        reply: oneshot::Sender<Result<PauseReport>>,
    },
    Resume {
        worker: Option<String>,
        reply: oneshot::Sender<Result<ResumeReport>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Progress {
        reply: oneshot::Sender<PlanProgress>,
    },
}

enum WorkerEvent {
    Started {
        slot: usize,
        session: Arc<AgentSession>,
    },
    Finished {
        slot: usize,
        item: PlanItem,
        result: Result<String>,
    },
}

/// Control surface of a live run
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Command>,
}

impl OrchestratorHandle {
    async fn call<T>(&self, command: Command, rx: oneshot::Receiver<T>) -> Result<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ConductorError::no_active_run())?;
        rx.await.map_err(|_| ConductorError::no_active_run())
    }

    /// Pause one worker, or every idle/working worker when `worker` is `None`
    pub async fn pause(&self, worker: Option<&str>, save_state: bool) -> Result<PauseReport> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Pause {
            worker: worker.map(str::to_string),
            save_state,
            reply,
        };
        self.call(command, rx).await?
    }

    /// Resume one worker, or every paused worker when `worker` is `None`
    pub async fn resume(&self, worker: Option<&str>) -> Result<ResumeReport> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Resume {
            worker: worker.map(str::to_string),
            reply,
        };
        self.call(command, rx).await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::Snapshot { reply }, rx).await
    }

    pub async fn progress(&self) -> Result<PlanProgress> {
        let (reply, rx) = oneshot::channel();
        self.call(Command::Progress { reply }, rx).await
    }
}

/// A started run
pub struct RunHandle {
    handle: OrchestratorHandle,
    join: JoinHandle<Result<RunSummary>>,
}

impl RunHandle {
    pub fn handle(&self) -> OrchestratorHandle {
        self.handle.clone()
    }

    /// Wait for the run loop to finish
    pub async fn wait(self) -> Result<RunSummary> {
        let Self { handle, join } = self;
        drop(handle);
        join.await
            .map_err(|e| ConductorError::Session(format!("Run loop terminated: {}", e)))?
    }

    /// Stop the run loop and its worker tasks where they are; the last
    /// snapshot stays in the store
    pub fn abort(&self) {
        self.join.abort();
    }

    pub fn abort_handle(&self) -> tokio::task::AbortHandle {
        self.join.abort_handle()
    }
}

/// Worker-pool coordinator
pub struct Orchestrator {
    config: Arc<ConductorConfig>,
    tracker: Arc<dyn TrackerClient>,
    store: Arc<dyn StateStore>,
    manager: Arc<SessionManager>,
    composer: Arc<dyn PromptComposer>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<ConductorConfig>,
        tracker: Arc<dyn TrackerClient>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let manager = Arc::new(SessionManager::new(&config));
        Self {
            config,
            tracker,
            store,
            manager,
            composer: Arc::new(DefaultPromptComposer),
        }
    }

    pub fn with_session_manager(mut self, manager: Arc<SessionManager>) -> Self {
        self.manager = manager;
        self
    }

    pub fn with_prompt_composer(mut self, composer: Arc<dyn PromptComposer>) -> Self {
        self.composer = composer;
        self
    }

    pub fn session_manager(&self) -> Arc<SessionManager> {
        self.manager.clone()
    }

    /// Fetch the epic's plan and drive it to completion. A pause saved by an
    /// earlier run holds its workers until it is resumed through the store.
    pub async fn run(&self, epic_id: &str) -> Result<RunSummary> {
        let plan = self.tracker.execution_plan(epic_id).await?;
        self.start(plan).await?.wait().await
    }

    /// Start the run loop for `plan`
    pub async fn start(&self, plan: ExecutionPlan) -> Result<RunHandle> {
        let restored = match self.store.load()? {
            Some(snapshot) if snapshot.epic_id == plan.epic_id => Some(snapshot),
            Some(snapshot) => {
                tracing::warn!(
                    previous = %snapshot.epic_id,
                    epic = %plan.epic_id,
                    "Replacing snapshot of another epic"
                );
                None
            }
            None => None,
        };

        let briefing = match self
            .tracker
            .briefing(&plan.epic_id, self.config.briefing_max_tokens)
            .await
        {
            Ok(briefing) => briefing,
            Err(e) => {
                tracing::warn!(epic = %plan.epic_id, error = %e, "Briefing fetch failed, continuing without it");
                None
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(32);
        let run_loop = RunLoop::new(self, plan, briefing, restored, events_tx);
        let join = tokio::spawn(run_loop.run(command_rx, events_rx));

        Ok(RunHandle {
            handle: OrchestratorHandle { tx: command_tx },
            join,
        })
    }

    /// Pause against the persisted snapshot; a live run in another process
    /// applies it on its next poll
    pub fn pause_persisted(&self, worker: Option<&str>, save_state: bool) -> Result<PauseReport> {
        control::pause_snapshot(self.store.as_ref(), worker, save_state)
    }

    /// Resume against the persisted snapshot; a live run in another process
    /// applies it on its next poll
    pub fn resume_persisted(&self, worker: Option<&str>) -> Result<ResumeReport> {
        control::resume_snapshot(self.store.as_ref(), worker)
    }
}

struct Slot {
    id: String,
    gate: watch::Sender<bool>,
    session: Option<Arc<AgentSession>>,
    item: Option<PlanItem>,
    summary: AgentSummary,
    held: bool,
    /// Agent-side half of the last pause, finished before any resume
    pausing: Option<JoinHandle<()>>,
    /// Teardown of the previous session; the next one waits for it
    retiring: Option<JoinHandle<()>>,
}

impl Slot {
    fn new(id: String) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            summary: AgentSummary::idle(id.clone()),
            id,
            gate,
            session: None,
            item: None,
            held: false,
            pausing: None,
            retiring: None,
        }
    }

    fn busy(&self) -> bool {
        self.item.is_some()
    }

    fn summary(&self) -> AgentSummary {
        match &self.session {
            Some(session) => session.summary(),
            None => {
                let mut summary = self.summary.clone();
                if self.held {
                    summary.status = SessionStatus::Paused;
                }
                summary
            }
        }
    }

    fn hold(&mut self) {
        self.held = true;
        self.gate.send_replace(false);
        let pending = self.session.as_ref().and_then(|s| s.hold().ok());
        if let Some(pending) = pending {
            self.pausing = Some(tokio::spawn(PendingPause::release(pending)));
        }
    }

    async fn release(&mut self) {
        self.held = false;
        if let Some(pausing) = self.pausing.take() {
            let _ = pausing.await;
        }
        self.gate.send_replace(true);
        if let Some(session) = &self.session {
            session.resume();
        }
    }
}

/// A tracker status update
enum Mark {
    Started(ItemKind, String),
    Completed(ItemKind, String),
}

impl Mark {
    async fn apply(self, tracker: &dyn TrackerClient) {
        match self {
            Mark::Started(kind, id) => {
                if let Err(e) = tracker.mark_started(kind, &id).await {
                    tracing::warn!(kind = %kind, identifier = %id, error = %e, "Failed to mark item started");
                }
            }
            Mark::Completed(kind, id) => {
                if let Err(e) = tracker.mark_completed(kind, &id).await {
                    tracing::warn!(kind = %kind, identifier = %id, error = %e, "Failed to mark item completed");
                }
            }
        }
    }
}

/// Tracker marks, sent in order by their own task
struct MarkLane {
    tx: mpsc::UnboundedSender<Mark>,
    join: JoinHandle<()>,
}

impl MarkLane {
    fn spawn(tracker: Arc<dyn TrackerClient>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Mark>();
        let join = tokio::spawn(async move {
            while let Some(mark) = rx.recv().await {
                mark.apply(tracker.as_ref()).await;
            }
        });
        Self { tx, join }
    }

    fn push(&self, mark: Mark) {
        if self.tx.send(mark).is_err() {
            tracing::warn!("Tracker mark lane stopped, dropping mark");
        }
    }

    /// Wait until every queued mark has been sent
    async fn flush(self) {
        drop(self.tx);
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "Tracker mark lane terminated");
        }
    }
}

struct RunLoop {
    plan: ExecutionPlan,
    store: Arc<dyn StateStore>,
    manager: Arc<SessionManager>,
    composer: Arc<dyn PromptComposer>,
    prompt_timeout: Duration,
    poll_interval: Duration,
    briefing: Option<Briefing>,
    scheduler: Scheduler,
    slots: Vec<Slot>,
    outcomes: Vec<ExpectedItemResult>,
    features_started: HashSet<String>,
    features_reported: HashSet<String>,
    global_paused: bool,
    paused_at: Option<DateTime<Utc>>,
    /// Last snapshot this loop wrote (or restored from)
    written: Option<SessionSnapshot>,
    /// The store holds edits from another process not yet applied
    external: bool,
    marks: MarkLane,
    workers: JoinSet<()>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl RunLoop {
    fn new(
        orchestrator: &Orchestrator,
        plan: ExecutionPlan,
        briefing: Option<Briefing>,
        restored: Option<SessionSnapshot>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let mut scheduler = Scheduler::new(&plan);
        let outcomes = restored
            .as_ref()
            .map(|s| s.outcomes.clone())
            .unwrap_or_default();
        scheduler.restore(&outcomes);

        let mut features_started = HashSet::new();
        let mut features_reported = HashSet::new();
        for outcome in &outcomes {
            match scheduler.item(&outcome.identifier) {
                Some(item) => {
                    features_started.insert(item.feature_id.clone());
                }
                None => {
                    features_reported.insert(outcome.identifier.clone());
                }
            }
        }
        if !outcomes.is_empty() {
            tracing::info!(
                epic = %plan.epic_id,
                restored = outcomes.len(),
                "Resuming from saved snapshot"
            );
        }

        let workers = orchestrator.config.max_concurrent_agents.max(1);
        let mut slots: Vec<Slot> = (1..=workers)
            .map(|n| Slot::new(format!("worker-{}", n)))
            .collect();

        // Pauses outlive the process that made them
        let mut global_paused = false;
        let mut paused_at = None;
        if let Some(snapshot) = &restored {
            for slot in slots.iter_mut() {
                if snapshot
                    .agent(&slot.id)
                    .is_some_and(|a| a.status == SessionStatus::Paused)
                {
                    slot.hold();
                }
            }
            global_paused = snapshot.global_pause;
            let held: Vec<&str> = slots
                .iter()
                .filter(|s| s.held)
                .map(|s| s.id.as_str())
                .collect();
            if global_paused || !held.is_empty() {
                paused_at = Some(snapshot.paused_at.unwrap_or_else(Utc::now));
                tracing::info!(
                    epic = %plan.epic_id,
                    all = global_paused,
                    held = %held.join(","),
                    "Saved pause still in effect"
                );
            }
        }

        Self {
            store: orchestrator.store.clone(),
            manager: orchestrator.manager.clone(),
            composer: orchestrator.composer.clone(),
            prompt_timeout: orchestrator.config.prompt_timeout(),
            poll_interval: orchestrator.config.state_poll_interval(),
            briefing,
            scheduler,
            slots,
            outcomes,
            features_started,
            features_reported,
            global_paused,
            paused_at,
            written: restored,
            external: false,
            marks: MarkLane::spawn(orchestrator.tracker.clone()),
            workers: JoinSet::new(),
            events,
            plan,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) -> Result<RunSummary> {
        tracing::info!(
            epic = %self.plan.epic_id,
            items = self.scheduler.progress().total,
            workers = self.slots.len(),
            "Run started"
        );
        self.save();
        self.settle().await;
        self.dispatch();

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.reset();

        let mut commands_open = true;
        loop {
            while self.workers.try_join_next().is_some() {}
            let busy = self.slots.iter().any(Slot::busy);
            if !busy && self.scheduler.is_done() {
                break;
            }
            tokio::select! {
                Some(event) = events.recv() => self.on_event(event).await,
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command).await,
                    None => commands_open = false,
                },
                _ = poll.tick() => self.external = true,
            }
            self.settle().await;
        }

        let finished = self.scheduler.is_done();
        let progress = self.scheduler.progress();
        if finished {
            if let Err(e) = self.store.clear() {
                tracing::warn!(error = %e, "Failed to clear run state");
            }
        } else {
            self.save();
        }

        while self.workers.join_next().await.is_some() {}
        for slot in self.slots.iter_mut() {
            if let Some(retiring) = slot.retiring.take() {
                let _ = retiring.await;
            }
        }
        let RunLoop {
            plan,
            outcomes,
            marks,
            ..
        } = self;
        marks.flush().await;

        tracing::info!(
            epic = %plan.epic_id,
            succeeded = progress.succeeded,
            failed = progress.failed,
            blocked = progress.blocked,
            pending = progress.pending,
            "Run ended"
        );

        Ok(RunSummary {
            epic_id: plan.epic_id,
            outcomes,
            progress,
            finished,
            reconciliation: None,
        })
    }

    fn agents(&self) -> Vec<AgentSummary> {
        self.slots.iter().map(Slot::summary).collect()
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            epic_id: self.plan.epic_id.clone(),
            epic_name: self.plan.epic_name.clone(),
            agents: self.agents(),
            completed: self
                .outcomes
                .iter()
                .filter(|o| o.success)
                .map(|o| o.identifier.clone())
                .collect(),
            outcomes: self.outcomes.clone(),
            paused_at: self.paused_at,
            global_pause: self.global_paused,
            updated_at: Utc::now(),
        }
    }

    /// Snapshot edits by another process, relative to our last write
    fn pending_requests(&self) -> Vec<ControlRequest> {
        let Some(written) = &self.written else {
            return Vec::new();
        };
        match self.store.load() {
            Ok(Some(persisted)) if persisted.epic_id == self.plan.epic_id => {
                control::external_requests(written, &persisted)
            }
            Ok(_) => Vec::new(),
            Err(e) => {
                tracing::warn!(epic = %self.plan.epic_id, error = %e, "Failed to read run state");
                Vec::new()
            }
        }
    }

    /// Persist the snapshot unless the store holds an unapplied edit; that
    /// case is left to `settle`, which applies the edit and writes after it
    fn save(&mut self) {
        if !self.pending_requests().is_empty() {
            self.external = true;
            return;
        }
        self.write();
    }

    fn write(&mut self) {
        let snapshot = self.snapshot();
        match self.store.save(&snapshot) {
            Ok(()) => self.written = Some(snapshot),
            Err(e) => {
                tracing::error!(epic = %self.plan.epic_id, error = %e, "Failed to persist snapshot")
            }
        }
    }

    /// Apply pause/resume requests another process wrote into the store
    async fn settle(&mut self) {
        if !std::mem::take(&mut self.external) {
            return;
        }
        let requests = self.pending_requests();
        if requests.is_empty() {
            return;
        }
        let mut resumed = false;
        for request in requests {
            tracing::info!(request = ?request, "Control request from run state");
            let applied = match &request {
                ControlRequest::Pause(worker) => self.pause_slots(worker.as_deref()).map(|_| ()),
                ControlRequest::Resume(worker) => {
                    resumed = true;
                    self.resume_slots(worker.as_deref()).await.map(|_| ())
                }
            };
            if let Err(e) = applied {
                tracing::warn!(request = ?request, error = %e, "Ignoring control request");
            }
        }
        self.write();
        if resumed {
            self.dispatch();
        }
    }

    fn record(&mut self, identifier: &str, success: bool) {
        self.outcomes.retain(|o| o.identifier != identifier);
        self.outcomes
            .push(ExpectedItemResult::new(identifier, success));
    }

    /// Fill free, unpaused slots with ready items
    fn dispatch(&mut self) {
        if !self.global_paused {
            while let Some(slot) = self.slots.iter().position(|s| !s.busy() && !s.held) {
                let Some(item) = self.scheduler.next_ready() else {
                    break;
                };
                self.assign(slot, item);
                self.save();
            }
        }

        if !self.slots.iter().any(Slot::busy) {
            let stalled = self.scheduler.block_stalled();
            for identifier in &stalled {
                tracing::warn!(identifier = %identifier, "Item can never become ready, blocking it");
                self.record(identifier, false);
            }
            if !stalled.is_empty() {
                for identifier in stalled {
                    self.rollup_feature_of(&identifier);
                }
                self.save();
            }
        }
    }

    fn assign(&mut self, slot_index: usize, item: PlanItem) {
        let identifier = item.identifier().to_string();
        if item.kind() == ItemKind::Task && self.features_started.insert(item.feature_id.clone()) {
            self.marks
                .push(Mark::Started(ItemKind::Feature, item.feature_id.clone()));
        }
        self.marks.push(Mark::Started(item.kind(), identifier.clone()));
        let prompt = self
            .composer
            .compose(&self.plan, &item, self.briefing.as_ref());

        let slot = &mut self.slots[slot_index];
        slot.item = Some(item.clone());
        slot.session = None;
        slot.summary = AgentSummary {
            id: slot.id.clone(),
            session_id: None,
            task_id: Some(identifier.clone()),
            task_title: Some(item.title.clone()),
            status: SessionStatus::Working,
            progress: 0,
            started_at: Some(Utc::now()),
            message_count: 0,
        };
        slot.gate.send_replace(true);
        tracing::info!(worker = %slot.id, task = %identifier, "Task assigned");

        let task = WorkerTask {
            slot: slot_index,
            worker_id: slot.id.clone(),
            item,
            prompt,
            gate: slot.gate.subscribe(),
            timeout: self.prompt_timeout,
            retiring: slot.retiring.take(),
            manager: self.manager.clone(),
            events: self.events.clone(),
        };
        self.workers.spawn(task.run());
    }

    async fn on_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Started { slot, session } => {
                let held = self.global_paused || self.slots[slot].held;
                let slot = &mut self.slots[slot];
                slot.session = Some(session);
                if held {
                    slot.hold();
                }
                self.save();
            }
            WorkerEvent::Finished { slot, item, result } => {
                self.on_finished(slot, item, result);
            }
        }
    }

    fn on_finished(&mut self, slot_index: usize, item: PlanItem, result: Result<String>) {
        let identifier = item.identifier().to_string();
        let success = result.is_ok();

        let slot = &mut self.slots[slot_index];
        let session = slot.session.take();
        slot.item = None;
        slot.pausing = None;
        slot.summary = match &session {
            Some(session) => session.summary(),
            None => {
                let mut summary = slot.summary.clone();
                summary.status = SessionStatus::Failed;
                summary
            }
        };
        match &result {
            Ok(_) => tracing::info!(worker = %slot.id, task = %identifier, "Task completed"),
            Err(e) => tracing::warn!(worker = %slot.id, task = %identifier, error = %e, "Task failed"),
        }
        if let Some(session) = session {
            let manager = self.manager.clone();
            slot.retiring = Some(tokio::spawn(async move {
                manager.destroy(session.id()).await;
            }));
        }

        let blocked = self.scheduler.complete(&identifier, success);
        self.record(&identifier, success);
        if success {
            self.marks.push(Mark::Completed(item.kind(), identifier.clone()));
        }
        for id in &blocked {
            tracing::warn!(identifier = %id, failed = %identifier, "Item blocked by failed dependency");
            self.record(id, false);
        }

        self.rollup_feature_of(&identifier);
        for id in blocked {
            self.rollup_feature_of(&id);
        }

        self.save();
        self.dispatch();
    }

    /// Report a task-bearing feature once all of its items are terminal
    fn rollup_feature_of(&mut self, identifier: &str) {
        let Some(item) = self.scheduler.item(identifier) else {
            return;
        };
        if item.kind() != ItemKind::Task {
            return;
        }
        let feature_id = item.feature_id.clone();
        if self.scheduler.item(&feature_id).is_some() || self.features_reported.contains(&feature_id)
        {
            return;
        }
        let Some(success) = self.scheduler.feature_status(&feature_id) else {
            return;
        };

        self.features_reported.insert(feature_id.clone());
        self.record(&feature_id, success);
        if success {
            self.marks
                .push(Mark::Completed(ItemKind::Feature, feature_id.clone()));
            tracing::info!(feature = %feature_id, "Feature completed");
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Pause {
                worker,
                save_state,
                reply,
            } => {
                let result = self.pause(worker.as_deref(), save_state);
                let _ = reply.send(result);
            }
            Command::Resume { worker, reply } => {
                let result = self.resume(worker.as_deref()).await;
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Progress { reply } => {
                let _ = reply.send(self.scheduler.progress());
            }
        }
    }

    /// Hold the planned slots; the agent-side work runs off the loop
    fn pause_slots(&mut self, worker: Option<&str>) -> Result<ControlPlan> {
        let plan = control::plan_pause(&self.agents(), worker)?;
        if plan.targets.is_empty() {
            return Ok(plan);
        }
        for slot in self
            .slots
            .iter_mut()
            .filter(|s| plan.targets.contains(&s.id))
        {
            slot.hold();
        }
        if worker.is_none() {
            self.global_paused = true;
        }
        self.paused_at = Some(Utc::now());
        tracing::info!(paused = %plan.targets.join(","), "Workers paused");
        Ok(plan)
    }

    async fn resume_slots(&mut self, worker: Option<&str>) -> Result<ControlPlan> {
        let plan = control::plan_resume(&self.agents(), worker)?;
        for slot in self
            .slots
            .iter_mut()
            .filter(|s| plan.targets.contains(&s.id))
        {
            slot.release().await;
        }
        let lifted = worker.is_none() && self.global_paused;
        if worker.is_none() {
            self.global_paused = false;
        }
        if !plan.targets.is_empty() || lifted {
            if !self
                .agents()
                .iter()
                .any(|a| a.status == SessionStatus::Paused)
            {
                self.paused_at = None;
            }
            tracing::info!(resumed = %plan.targets.join(","), "Workers resumed");
        }
        Ok(plan)
    }

    fn pause(&mut self, worker: Option<&str>, save_state: bool) -> Result<PauseReport> {
        let plan = self.pause_slots(worker)?;
        let mut report = PauseReport::from_plan(&plan);
        if !plan.targets.is_empty() {
            self.save();
        }
        if save_state {
            let checkpoint = CheckpointSummary::from_snapshot(&self.snapshot());
            checkpoint.log();
            report.checkpoint = Some(checkpoint);
        }
        Ok(report)
    }

    async fn resume(&mut self, worker: Option<&str>) -> Result<ResumeReport> {
        let held = self.global_paused;
        let plan = self.resume_slots(worker).await?;
        if !plan.targets.is_empty() || (worker.is_none() && held) {
            self.save();
            self.dispatch();
        }
        Ok(ResumeReport::from_plan(&plan))
    }
}

/// One assignment, executed off the run loop
struct WorkerTask {
    slot: usize,
    worker_id: String,
    item: PlanItem,
    prompt: String,
    gate: watch::Receiver<bool>,
    timeout: Duration,
    retiring: Option<JoinHandle<()>>,
    manager: Arc<SessionManager>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerTask {
    async fn run(mut self) {
        let identifier = self.item.identifier().to_string();
        // Keeps the live session count within the pool size
        if let Some(retiring) = self.retiring.take() {
            let _ = retiring.await;
        }

        let session = match self.manager.create_session(&self.worker_id).await {
            Ok(session) => session,
            Err(e) => {
                let _ = self.events.send(WorkerEvent::Finished {
                    slot: self.slot,
                    item: self.item,
                    result: Err(e),
                });
                return;
            }
        };
        session.assign(&identifier, &self.item.title);
        let _ = self.events.send(WorkerEvent::Started {
            slot: self.slot,
            session: session.clone(),
        });

        // A pause that landed before the session existed holds dispatch here
        let open = self.gate.wait_for(|open| *open).await.is_ok();
        let result = if open {
            session.send_and_wait(&self.prompt, self.timeout).await
        } else {
            Err(ConductorError::Session("run stopped".to_string()))
        };
        let _ = self.events.send(WorkerEvent::Finished {
            slot: self.slot,
            item: self.item,
            result,
        });
    }
}
