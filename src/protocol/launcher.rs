//! Agent process launch settings

use crate::config::{AgentConfig, ConductorConfig, PermissionPolicy};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Default deadline for control requests
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Capacity of the per-client event broadcast
const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// How to start one agent process
#[derive(Debug, Clone)]
pub struct AgentLauncher {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl AgentLauncher {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            cwd: None,
        }
    }

    /// Run an inline `sh -c` script; used by tests and ad-hoc agents
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh", vec!["-c".to_string(), script.into()])
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Working directory reported to the agent in `session/new`
    pub fn session_cwd(&self) -> PathBuf {
        self.cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub(crate) fn command(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl From<&AgentConfig> for AgentLauncher {
    fn from(config: &AgentConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            cwd: config.cwd.clone(),
        }
    }
}

/// Per-client protocol behaviour
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Deadline for control requests
    pub request_timeout: Duration,
    /// Silence allowed while an operation is in flight; `None` disables the watchdog
    pub inactivity_timeout: Option<Duration>,
    pub permission_policy: PermissionPolicy,
    pub event_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            inactivity_timeout: None,
            permission_policy: PermissionPolicy::Allow,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ClientOptions {
    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl From<&ConductorConfig> for ClientOptions {
    fn from(config: &ConductorConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            inactivity_timeout: config.inactivity_timeout(),
            permission_policy: config.permission_policy,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_launcher() {
        let launcher = AgentLauncher::shell("echo hi").with_env("A", "1");
        assert_eq!(launcher.command, "sh");
        assert_eq!(launcher.args, vec!["-c", "echo hi"]);
        assert_eq!(launcher.env["A"], "1");
    }

    #[test]
    fn test_from_agent_config() {
        let config = AgentConfig {
            command: "agent".to_string(),
            args: vec!["--stdio".to_string()],
            env: HashMap::new(),
            cwd: Some(PathBuf::from("/work")),
        };
        let launcher = AgentLauncher::from(&config);
        assert_eq!(launcher.command, "agent");
        assert_eq!(launcher.session_cwd(), PathBuf::from("/work"));
    }

    #[test]
    fn test_options_from_config() {
        let config = ConductorConfig {
            inactivity_timeout_ms: 0,
            request_timeout_ms: 1500,
            ..Default::default()
        };
        let options = ClientOptions::from(&config);
        assert_eq!(options.inactivity_timeout, None);
        assert_eq!(options.request_timeout, Duration::from_millis(1500));
    }
}
