pub mod auth;
pub mod pause;
pub mod resume;
pub mod run;
pub mod status;

use crate::config::ConductorConfig;
use crate::error::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

/// A3S Conductor - Coordinate coding agents across an epic
#[derive(Debug, Parser)]
#[command(name = "a3s-conductor", version, about)]
pub struct Cli {
    /// Config file (default: ~/.a3s/conductor/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Drive an epic's execution plan with a pool of agents
    Run {
        /// Epic identifier (e.g. "ENG")
        #[arg(long)]
        epic: String,

        /// Override the configured worker-pool size
        #[arg(long)]
        max_agents: Option<usize>,

        /// Skip the post-run audit against the tracker
        #[arg(long)]
        no_reconcile: bool,
    },

    /// Pause one worker, or every running worker
    Pause {
        /// Worker id (e.g. "worker-2")
        worker: Option<String>,

        /// Also log a checkpoint summary
        #[arg(long)]
        save_state: bool,
    },

    /// Resume one paused worker, or all of them
    Resume {
        /// Worker id (e.g. "worker-2")
        worker: Option<String>,
    },

    /// Store the tracker API token
    Auth {
        /// Token to store; read from stdin when omitted
        #[arg(long)]
        token: Option<String>,
    },

    /// Show the persisted run state
    Status,
}

/// Route a parsed command to its handler
pub async fn dispatch(command: Commands, config: Arc<ConductorConfig>) -> Result<()> {
    match command {
        Commands::Run {
            epic,
            max_agents,
            no_reconcile,
        } => run::execute(config, &epic, max_agents, !no_reconcile)
            .await
            .map(|_| ()),
        Commands::Pause { worker, save_state } => {
            pause::execute(&config, worker.as_deref(), save_state)
        }
        Commands::Resume { worker } => resume::execute(&config, worker.as_deref()),
        Commands::Auth { token } => auth::execute(token.as_deref()),
        Commands::Status => status::execute(&config),
    }
}
