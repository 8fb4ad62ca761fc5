//! Conductor configuration
//!
//! `ConductorConfig` is built once at startup (TOML file + environment
//! overrides) and then shared read-only as `Arc<ConductorConfig>` by the
//! orchestrator, the session manager and the CLI handlers.

use crate::dirs;
use crate::error::{ConductorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How a paused session continues once resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeStrategy {
    /// Keep the agent process alive across the pause and prompt it again
    #[default]
    Reuse,
    /// Kill the process on pause; launch a fresh one and `session/load` on resume
    Respawn,
}

/// Automatic answer to `session/request_permission`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    #[default]
    Allow,
    Reject,
}

/// External agent process definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Executable to launch (e.g. "claude-code-acp")
    #[serde(default = "default_agent_command")]
    pub command: String,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the agent; defaults to the current directory
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

fn default_agent_command() -> String {
    "claude-code-acp".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }
}

/// Work-tracking backend connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Base URL of the tracker REST API
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token; the credentials file and env take precedence
    #[serde(default)]
    pub token: Option<String>,

    /// Deadline for one tracker HTTP request
    #[serde(default = "default_tracker_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_tracker_timeout_ms() -> u64 {
    30_000
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout_ms: default_tracker_timeout_ms(),
        }
    }
}

impl TrackerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Immutable settings for one conductor process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Worker-pool ceiling
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,

    /// Deadline for control requests (initialize, session/new, session/load)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Deadline for a single prompt turn
    #[serde(default = "default_prompt_timeout_ms")]
    pub prompt_timeout_ms: u64,

    /// Maximum silence from an agent before its operation is abandoned (0 disables)
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,

    #[serde(default)]
    pub resume_strategy: ResumeStrategy,

    #[serde(default)]
    pub permission_policy: PermissionPolicy,

    /// Sent in place of the original prompt when a paused turn continues
    #[serde(default = "default_resume_prompt")]
    pub resume_prompt: String,

    /// Token budget requested for the epic briefing
    #[serde(default = "default_briefing_max_tokens")]
    pub briefing_max_tokens: u32,

    /// Snapshot location for the file-backed state store
    #[serde(default = "dirs::state_path")]
    pub state_path: PathBuf,

    /// How often a live run re-reads the snapshot for pause/resume
    /// requests written by other processes
    #[serde(default = "default_state_poll_ms")]
    pub state_poll_ms: u64,

    /// Default tracing filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,
}

fn default_max_concurrent_agents() -> usize {
    3
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_prompt_timeout_ms() -> u64 {
    30 * 60 * 1000
}

fn default_inactivity_timeout_ms() -> u64 {
    5 * 60 * 1000
}

fn default_resume_prompt() -> String {
    "You were paused mid-task. Continue the task you were working on from where you left off."
        .to_string()
}

fn default_briefing_max_tokens() -> u32 {
    4_000
}

fn default_state_poll_ms() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            request_timeout_ms: default_request_timeout_ms(),
            prompt_timeout_ms: default_prompt_timeout_ms(),
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
            resume_strategy: ResumeStrategy::default(),
            permission_policy: PermissionPolicy::default(),
            resume_prompt: default_resume_prompt(),
            briefing_max_tokens: default_briefing_max_tokens(),
            state_path: dirs::state_path(),
            state_poll_ms: default_state_poll_ms(),
            log_level: default_log_level(),
            agent: AgentConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl ConductorConfig {
    /// Load configuration from `path`, or the default config path.
    /// Returns defaults if the file does not exist. Environment overrides
    /// are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(dirs::config_path);
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                ConductorError::invalid(format!(
                    "Failed to read config file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            toml::from_str::<ConductorConfig>(&content)?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        if let Ok(url) = std::env::var("A3S_CONDUCTOR_TRACKER_URL") {
            config.tracker.base_url = Some(url);
        }

        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_agents == 0 {
            return Err(ConductorError::invalid(
                "max_concurrent_agents must be at least 1",
            ));
        }
        if self.agent.command.trim().is_empty() {
            return Err(ConductorError::invalid("agent.command must not be empty"));
        }
        if self.request_timeout_ms == 0
            || self.prompt_timeout_ms == 0
            || self.tracker.timeout_ms == 0
        {
            return Err(ConductorError::invalid("timeouts must be greater than zero"));
        }
        Ok(())
    }

    /// Copy with a different pool size (CLI `--max-agents`)
    pub fn with_max_concurrent_agents(mut self, max: usize) -> Self {
        self.max_concurrent_agents = max;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_timeout_ms)
    }

    pub fn state_poll_interval(&self) -> Duration {
        Duration::from_millis(self.state_poll_ms.max(10))
    }

    pub fn inactivity_timeout(&self) -> Option<Duration> {
        (self.inactivity_timeout_ms > 0).then(|| Duration::from_millis(self.inactivity_timeout_ms))
    }

    /// Resolve the tracker token: env, then the credentials file, then config
    pub fn tracker_token(&self) -> Option<String> {
        if let Ok(token) = std::env::var("A3S_CONDUCTOR_TOKEN") {
            if !token.trim().is_empty() {
                return Some(token.trim().to_string());
            }
        }
        self.tracker_token_from(&dirs::credentials_path())
    }

    fn tracker_token_from(&self, credentials: &Path) -> Option<String> {
        std::fs::read_to_string(credentials)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| self.tracker.token.clone())
    }
}

/// Persist a tracker token for later runs (`auth --token`)
pub fn store_token(path: &Path, token: &str) -> Result<()> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ConductorError::invalid("Token must not be empty"));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, token)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(path = %path.display(), "Tracker token stored");
    Ok(())
}
