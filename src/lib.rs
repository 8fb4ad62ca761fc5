//! # a3s-conductor
//!
//! Coordinates pools of external coding-agent processes against a
//! work-tracking backend.
//!
//! ## Overview
//!
//! `a3s-conductor` launches agent processes that speak JSON-RPC over stdio,
//! prompts them with the ready items of an epic's execution plan under a
//! concurrency ceiling, checkpoints the run after every transition, supports
//! pause/resume, and audits the agents' claimed outcomes against the tracker
//! once the plan is exhausted.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use a3s_conductor::{ConductorConfig, FileStateStore, HttpTrackerClient, Orchestrator};
//!
//! # async fn example() -> a3s_conductor::Result<()> {
//! let config = Arc::new(ConductorConfig::load(None)?);
//! let tracker = Arc::new(HttpTrackerClient::from_config(&config)?);
//! let store = Arc::new(FileStateStore::new(config.state_path.clone()));
//!
//! let orchestrator = Orchestrator::new(config, tracker.clone(), store);
//! let summary = orchestrator.run("ENG").await?;
//!
//! let report = a3s_conductor::reconcile(tracker.as_ref(), "ENG", &summary.outcomes).await?;
//! println!("clean: {}", report.clean);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **AgentProtocolClient**: one agent process, request/response correlation, typed events
//! - **AgentSession**: idle / working / paused / completed / failed state machine
//! - **SessionManager**: session factory and live registry
//! - **Orchestrator**: dependency-aware worker pool with pause/resume and snapshots
//! - **reconcile**: post-run audit of claimed outcomes
//! - **TrackerClient** / **StateStore**: the two pluggable collaborators

pub mod cli;
pub mod config;
pub mod dirs;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod state;
pub mod tracker;

// Re-export core types
pub use config::{ConductorConfig, PermissionPolicy, ResumeStrategy};
pub use error::{ConductorError, Result, StructuredError};
pub use orchestrator::{
    Orchestrator, OrchestratorHandle, PauseReport, PlanProgress, ResumeReport, RunHandle,
    RunSummary,
};
pub use protocol::{AgentEvent, AgentLauncher, AgentProtocolClient, ClientOptions, EventKind};
pub use reconcile::{reconcile, Discrepancy, ExpectedItemResult, ReconciliationReport};
pub use session::{AgentSession, AgentSummary, SessionManager, SessionOptions, SessionStatus};
pub use state::{FileStateStore, MemoryStateStore, SessionSnapshot, StateStore};
pub use tracker::{ExecutionPlan, HttpTrackerClient, MemoryTracker, TrackerClient};
