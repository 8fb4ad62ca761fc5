//! Agent sessions
//!
//! An [`AgentSession`] wraps one [`AgentProtocolClient`] plus the agent-side
//! session it opened, and exposes a single "send prompt, await final result"
//! operation on top of a small state machine:
//!
//! ```text
//! idle ──send──▶ working ──success──▶ completed
//!                  │  ▲  └──failure──▶ failed
//!            pause │  │ resume
//!                  ▼  │
//!                 paused
//! ```
//!
//! Pause and resume on a completed or failed session report the current
//! status and change nothing.

pub mod manager;

pub use manager::SessionManager;

use crate::config::{ConductorConfig, ResumeStrategy};
use crate::error::{ConductorError, Result};
use crate::protocol::{
    plan_progress, AgentEvent, AgentLauncher, AgentProtocolClient, ClientOptions, EventKind,
    InitializeParams, StopReason,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Working,
    Paused,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of a pause request on one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    Paused,
    AlreadyPaused,
    NotRunning(SessionStatus),
}

/// Result of a resume request on one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resumed,
    NotPaused(SessionStatus),
}

/// Persisted view of one worker's session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    /// Worker slot id (`worker-N`)
    pub id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub task_title: Option<String>,
    pub status: SessionStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: u64,
}

impl AgentSummary {
    /// Summary of a slot that has no session yet
    pub fn idle(worker_id: impl Into<String>) -> Self {
        Self {
            id: worker_id.into(),
            session_id: None,
            task_id: None,
            task_title: None,
            status: SessionStatus::Idle,
            progress: 0,
            started_at: None,
            message_count: 0,
        }
    }
}

/// Session construction settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub client: ClientOptions,
    pub resume_strategy: ResumeStrategy,
    pub resume_prompt: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&ConductorConfig::default())
    }
}

impl From<&ConductorConfig> for SessionOptions {
    fn from(config: &ConductorConfig) -> Self {
        Self {
            client: ClientOptions::from(config),
            resume_strategy: config.resume_strategy,
            resume_prompt: config.resume_prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Running,
    Paused,
    Closed,
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    task_id: Option<String>,
    task_title: Option<String>,
    progress: u8,
    started_at: Option<DateTime<Utc>>,
    in_flight: bool,
    /// The in-flight turn was cancelled by a pause
    interrupted: bool,
}

/// Coordinator-side handle for one agent process
pub struct AgentSession {
    id: String,
    worker_id: String,
    launcher: AgentLauncher,
    options: SessionOptions,
    client: RwLock<Arc<AgentProtocolClient>>,
    remote_session_id: RwLock<String>,
    state: Arc<Mutex<SessionState>>,
    gate: watch::Sender<Gate>,
    retired_messages: AtomicU64,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("id", &self.id)
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}

impl AgentSession {
    /// Launch the agent, run the handshake and open an agent-side session
    pub async fn start(
        worker_id: impl Into<String>,
        launcher: AgentLauncher,
        options: SessionOptions,
    ) -> Result<Self> {
        let worker_id = worker_id.into();
        let (client, remote_id) = connect(&launcher, &options.client).await?;

        let state = Arc::new(Mutex::new(SessionState {
            status: SessionStatus::Idle,
            task_id: None,
            task_title: None,
            progress: 0,
            started_at: None,
            in_flight: false,
            interrupted: false,
        }));
        watch_progress(&client, state.clone());

        let (gate, _) = watch::channel(Gate::Running);
        let session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            worker_id,
            launcher,
            options,
            client: RwLock::new(client),
            remote_session_id: RwLock::new(remote_id),
            state,
            gate,
            retired_messages: AtomicU64::new(0),
        };
        tracing::debug!(
            worker = %session.worker_id,
            session = %session.id,
            remote = %session.remote_session_id(),
            "Agent session started"
        );
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Session id chosen by the agent in `session/new`
    pub fn remote_session_id(&self) -> String {
        self.remote_session_id
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn client(&self) -> Option<Arc<AgentProtocolClient>> {
        self.client.read().ok().map(|c| c.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| ConductorError::Session("session state poisoned".to_string()))
    }

    fn read<T>(&self, f: impl FnOnce(&SessionState) -> T) -> Option<T> {
        self.state.lock().ok().map(|st| f(&st))
    }

    pub fn status(&self) -> SessionStatus {
        self.read(|st| st.status).unwrap_or(SessionStatus::Failed)
    }

    pub fn task_id(&self) -> Option<String> {
        self.read(|st| st.task_id.clone()).flatten()
    }

    /// Advisory progress (0-100) from the agent's plan updates
    pub fn progress(&self) -> u8 {
        self.read(|st| st.progress).unwrap_or(0)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.read(|st| st.started_at).flatten()
    }

    /// Time since the session first started working
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at()
            .and_then(|t| (Utc::now() - t).to_std().ok())
    }

    /// Frames received from the agent, across respawns
    pub fn message_count(&self) -> u64 {
        self.retired_messages.load(Ordering::SeqCst)
            + self.client().map(|c| c.message_count()).unwrap_or(0)
    }

    pub fn pid(&self) -> Option<u32> {
        self.client().and_then(|c| c.pid())
    }

    pub fn is_alive(&self) -> bool {
        self.client().map(|c| c.is_alive()).unwrap_or(false)
    }

    /// Attach task metadata; the prompt is dispatched by `send_and_wait`
    pub fn assign(&self, task_id: impl Into<String>, title: impl Into<String>) {
        if let Ok(mut st) = self.state.lock() {
            st.task_id = Some(task_id.into());
            st.task_title = Some(title.into());
            st.progress = 0;
        }
    }

    pub fn summary(&self) -> AgentSummary {
        let (status, task_id, task_title, progress, started_at) = self
            .read(|st| {
                (
                    st.status,
                    st.task_id.clone(),
                    st.task_title.clone(),
                    st.progress,
                    st.started_at,
                )
            })
            .unwrap_or((SessionStatus::Failed, None, None, 0, None));
        AgentSummary {
            id: self.worker_id.clone(),
            session_id: Some(self.id.clone()),
            task_id,
            task_title,
            status,
            progress,
            started_at,
            message_count: self.message_count(),
        }
    }

    /// Prompt the agent and wait for the final text of the turn.
    ///
    /// Settles exactly once: `Ok` leaves the session completed, `Err` leaves
    /// it failed. While the session is paused this call is held until it is
    /// resumed (or closed).
    pub async fn send_and_wait(&self, prompt: &str, timeout: Duration) -> Result<String> {
        {
            let mut st = self.lock()?;
            if st.in_flight {
                return Err(ConductorError::Session(format!(
                    "Session {} already has a prompt in flight",
                    self.worker_id
                )));
            }
            if *self.gate.borrow() == Gate::Closed {
                st.status = SessionStatus::Failed;
                return Err(ConductorError::Session("Session is closed".to_string()));
            }
            // A paused session takes the prompt but holds it until resumed
            if st.status != SessionStatus::Paused {
                st.status = SessionStatus::Working;
            }
            st.in_flight = true;
            st.interrupted = false;
            st.started_at.get_or_insert_with(Utc::now);
        }

        let outcome = self.drive(prompt, timeout).await;

        let mut st = self.lock()?;
        st.in_flight = false;
        st.interrupted = false;
        match &outcome {
            Ok(_) => {
                st.status = SessionStatus::Completed;
                st.progress = 100;
                tracing::debug!(worker = %self.worker_id, "Session completed");
            }
            Err(e) => {
                st.status = SessionStatus::Failed;
                tracing::debug!(worker = %self.worker_id, error = %e, "Session failed");
            }
        }
        outcome
    }

    async fn drive(&self, prompt: &str, timeout: Duration) -> Result<String> {
        let mut text = prompt.to_string();
        loop {
            self.wait_until_running().await?;

            if self.options.resume_strategy == ResumeStrategy::Respawn && !self.is_alive() {
                if !self.respawn().await? {
                    // Fresh agent-side session: start the task over
                    text = prompt.to_string();
                }
            }

            let client = self
                .client()
                .ok_or_else(|| ConductorError::Session("session client unavailable".to_string()))?;
            let turn = client
                .prompt(&self.remote_session_id(), &text, timeout)
                .await;

            match turn {
                Ok(turn) if turn.stop_reason == StopReason::Cancelled && self.take_interrupted() => {
                    text = self.options.resume_prompt.clone();
                }
                Ok(turn) if turn.stop_reason.is_success() => return Ok(turn.text),
                Ok(turn) => {
                    return Err(ConductorError::AgentFailed(format!(
                        "turn ended with stop reason {:?}",
                        turn.stop_reason
                    )))
                }
                Err(e) if self.take_interrupted() => {
                    tracing::debug!(worker = %self.worker_id, error = %e, "Turn interrupted by pause");
                    text = self.options.resume_prompt.clone();
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn take_interrupted(&self) -> bool {
        self.state
            .lock()
            .map(|mut st| std::mem::take(&mut st.interrupted))
            .unwrap_or(false)
    }

    async fn wait_until_running(&self) -> Result<()> {
        let mut gate = self.gate.subscribe();
        let state = gate
            .wait_for(|g| *g != Gate::Paused)
            .await
            .map(|g| *g)
            .unwrap_or(Gate::Closed);
        if state == Gate::Closed {
            return Err(ConductorError::Session(format!(
                "Session {} was closed",
                self.worker_id
            )));
        }
        Ok(())
    }

    /// Replace a dead process with a fresh one. Returns true when the
    /// agent-side session was restored with `session/load`.
    async fn respawn(&self) -> Result<bool> {
        if let Some(old) = self.client() {
            self.retired_messages
                .fetch_add(old.message_count(), Ordering::SeqCst);
        }
        let client = AgentProtocolClient::spawn(&self.launcher, self.options.client.clone()).await?;
        let init = client.initialize(InitializeParams::default()).await?;
        let cwd = self.launcher.session_cwd();
        let previous = self.remote_session_id();

        let restored = if init.agent_capabilities.load_session {
            match client.load_session(&previous, &cwd).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(worker = %self.worker_id, error = %e, "session/load failed, opening a new session");
                    false
                }
            }
        } else {
            false
        };
        if !restored {
            let remote = client.new_session(&cwd).await?;
            if let Ok(mut id) = self.remote_session_id.write() {
                *id = remote;
            }
        }

        let client = Arc::new(client);
        watch_progress(&client, self.state.clone());
        if let Ok(mut slot) = self.client.write() {
            *slot = client;
        }
        tracing::info!(worker = %self.worker_id, restored, "Agent process respawned");
        Ok(restored)
    }

    /// Pause the session. A running turn is cancelled; under the respawn
    /// strategy the process is stopped as well.
    pub async fn pause(&self) -> PauseOutcome {
        match self.hold() {
            Ok(pending) => {
                pending.release().await;
                PauseOutcome::Paused
            }
            Err(outcome) => outcome,
        }
    }

    /// Mark the session paused without waiting on the agent. The returned
    /// [`PendingPause`] does the agent-side part (cancel or stop) and must be
    /// driven before the session is resumed.
    pub fn hold(&self) -> std::result::Result<PendingPause, PauseOutcome> {
        let Ok(mut st) = self.state.lock() else {
            return Err(PauseOutcome::NotRunning(SessionStatus::Failed));
        };
        match st.status {
            SessionStatus::Paused => return Err(PauseOutcome::AlreadyPaused),
            s @ (SessionStatus::Completed | SessionStatus::Failed) => {
                return Err(PauseOutcome::NotRunning(s))
            }
            SessionStatus::Idle | SessionStatus::Working => {}
        }
        st.status = SessionStatus::Paused;
        self.gate.send_if_modified(|g| {
            let pause = *g == Gate::Running;
            if pause {
                *g = Gate::Paused;
            }
            pause
        });
        if st.in_flight {
            st.interrupted = true;
        }
        Ok(PendingPause {
            worker_id: self.worker_id.clone(),
            client: self.client(),
            remote_session_id: self.remote_session_id(),
            strategy: self.options.resume_strategy,
            interrupt: st.in_flight,
        })
    }

    /// Resume a paused session; a held turn continues with the resume prompt
    pub fn resume(&self) -> ResumeOutcome {
        let Ok(mut st) = self.state.lock() else {
            return ResumeOutcome::NotPaused(SessionStatus::Failed);
        };
        if st.status != SessionStatus::Paused {
            return ResumeOutcome::NotPaused(st.status);
        }
        st.status = SessionStatus::Working;
        self.gate.send_if_modified(|g| {
            let resume = *g == Gate::Paused;
            if resume {
                *g = Gate::Running;
            }
            resume
        });
        tracing::info!(worker = %self.worker_id, "Session resumed");
        ResumeOutcome::Resumed
    }

    /// Release any held turn and kill the process
    pub async fn close(&self) {
        self.gate.send_replace(Gate::Closed);
        if let Some(client) = self.client() {
            client.shutdown().await;
        }
        tracing::debug!(worker = %self.worker_id, session = %self.id, "Session closed");
    }
}

/// Agent-side half of a pause, see [`AgentSession::hold`]
pub struct PendingPause {
    worker_id: String,
    client: Option<Arc<AgentProtocolClient>>,
    remote_session_id: String,
    strategy: ResumeStrategy,
    interrupt: bool,
}

impl PendingPause {
    /// Cancel the running turn, or stop the process under respawn
    pub async fn release(self) {
        if let Some(client) = &self.client {
            match self.strategy {
                ResumeStrategy::Reuse if self.interrupt => {
                    if let Err(e) = client.cancel(&self.remote_session_id).await {
                        tracing::warn!(worker = %self.worker_id, error = %e, "Failed to cancel turn");
                    }
                }
                ResumeStrategy::Reuse => {}
                ResumeStrategy::Respawn => client.shutdown().await,
            }
        }
        tracing::info!(worker = %self.worker_id, interrupted = self.interrupt, "Session paused");
    }
}

async fn connect(
    launcher: &AgentLauncher,
    options: &ClientOptions,
) -> Result<(Arc<AgentProtocolClient>, String)> {
    let client = AgentProtocolClient::spawn(launcher, options.clone()).await?;
    let opened = async {
        client.initialize(InitializeParams::default()).await?;
        client.new_session(&launcher.session_cwd()).await
    }
    .await;
    match opened {
        Ok(remote_id) => Ok((Arc::new(client), remote_id)),
        Err(e) => {
            client.shutdown().await;
            Err(e)
        }
    }
}

/// Track plan progress reported through `session/update`
fn watch_progress(client: &AgentProtocolClient, state: Arc<Mutex<SessionState>>) {
    let mut updates = client.subscribe_kind(EventKind::SessionUpdate);
    tokio::spawn(async move {
        while let Some(event) = updates.next().await {
            let AgentEvent::SessionUpdate { update, .. } = event else {
                continue;
            };
            if let Some(progress) = plan_progress(&update) {
                if let Ok(mut st) = state.lock() {
                    st.progress = progress;
                }
            }
        }
    });
}
