//! Session manager
//!
//! Creates sessions from the configured agent launcher and keeps the registry
//! of live ones. It does not limit concurrency; the orchestrator decides how
//! many sessions exist at once.

use super::{AgentSession, SessionOptions};
use crate::config::ConductorConfig;
use crate::error::{ConductorError, Result};
use crate::protocol::AgentLauncher;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Factory and registry for agent sessions
pub struct SessionManager {
    launcher: AgentLauncher,
    options: SessionOptions,
    sessions: RwLock<HashMap<String, Arc<AgentSession>>>,
    live: AtomicUsize,
    /// Read-held for the whole of a create; set once `destroy_all` runs
    closed: RwLock<bool>,
}

impl SessionManager {
    /// Manager launching the agent described in `config.agent`
    pub fn new(config: &ConductorConfig) -> Self {
        Self::with_launcher(AgentLauncher::from(&config.agent), SessionOptions::from(config))
    }

    pub fn with_launcher(launcher: AgentLauncher, options: SessionOptions) -> Self {
        Self {
            launcher,
            options,
            sessions: RwLock::new(HashMap::new()),
            live: AtomicUsize::new(0),
            closed: RwLock::new(false),
        }
    }

    /// Launch a new agent process and register its session. Fails once
    /// `destroy_all` has been called.
    pub async fn create_session(&self, worker_id: &str) -> Result<Arc<AgentSession>> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(ConductorError::Session(format!(
                "Session manager is shut down, not starting {}",
                worker_id
            )));
        }
        let session = Arc::new(
            AgentSession::start(worker_id, self.launcher.clone(), self.options.clone()).await?,
        );
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(session.id().to_string(), session.clone());
        }
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        drop(closed);
        tracing::info!(
            worker = %worker_id,
            session = %session.id(),
            pid = ?session.pid(),
            live,
            "Session created"
        );
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<AgentSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// All registered sessions
    pub async fn sessions(&self) -> Vec<Arc<AgentSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Close one session and kill its process. Returns false if unknown.
    pub async fn destroy(&self, session_id: &str) -> bool {
        let session = self.sessions.write().await.remove(session_id);
        match session {
            Some(session) => {
                session.close().await;
                self.live.fetch_sub(1, Ordering::SeqCst);
                tracing::debug!(session = %session_id, "Session destroyed");
                true
            }
            None => false,
        }
    }

    /// Close every session and refuse new ones. Creates already in flight
    /// finish registering first, so their processes are reaped here too.
    pub async fn destroy_all(&self) -> usize {
        *self.closed.write().await = true;
        let drained: Vec<Arc<AgentSession>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, s)| s).collect()
        };
        let count = drained.len();
        futures::future::join_all(drained.iter().map(|s| s.close())).await;
        self.live.fetch_sub(count, Ordering::SeqCst);
        if count > 0 {
            tracing::info!(count, "All sessions destroyed");
        }
        count
    }

    /// Number of sessions created and not yet destroyed
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}
