//! Error types for a3s-conductor

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while coordinating agent sessions
#[derive(Debug, Error)]
pub enum ConductorError {
    /// No active orchestration (or other required state) exists
    #[error("{message}")]
    ConfigMissing { message: String, hint: String },

    /// Bad worker id, bad arguments, or an invalid configuration value
    #[error("{message}")]
    ConfigInvalid {
        message: String,
        available: Vec<String>,
        hint: Option<String>,
    },

    /// A request got no matching response within its deadline
    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    ProtocolTimeout { method: String, timeout_ms: u64 },

    /// The agent produced no output at all for too long
    #[error("Agent inactive: no output for {idle_ms}ms while waiting on '{method}'")]
    ProtocolInactive { method: String, idle_ms: u64 },

    /// The agent process terminated without a usable result
    #[error("Agent process exited{} without a result", exit_suffix(.code))]
    ProcessExit { code: Option<i32>, stderr: String },

    /// The agent replied with a JSON-RPC error object
    #[error("Agent returned error for '{method}': {message} ({code})")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    /// Malformed or unexpected protocol traffic
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The agent finished its turn but reported failure
    #[error("Agent reported failure: {0}")]
    AgentFailed(String),

    /// Operation not valid in the session's current state
    #[error("Session error: {0}")]
    Session(String),

    /// The operator stopped a run; its checkpoint is kept
    #[error("Run interrupted: {0}")]
    Interrupted(String),

    /// Work-tracking backend call failed
    #[error("Tracker API error{}: {message}", status_suffix(.status))]
    CollaboratorApi { status: Option<u16>, message: String },

    /// I/O failure (process spawn, state file, pipes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML config parse failure
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML config write failure
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!(" with code {}", c),
        None => String::new(),
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" (HTTP {})", s),
        None => String::new(),
    }
}

impl ConductorError {
    /// No active run in the state store
    pub fn no_active_run() -> Self {
        Self::ConfigMissing {
            message: "No active orchestration found".to_string(),
            hint: "Start one with `a3s-conductor run --epic <id>`".to_string(),
        }
    }

    /// Unknown worker id, carrying the ids that do exist
    pub fn unknown_worker(worker_id: &str, available: Vec<String>) -> Self {
        let hint = if available.is_empty() {
            "No workers are registered for this run".to_string()
        } else {
            format!("Available workers: {}", available.join(", "))
        };
        Self::ConfigInvalid {
            message: format!("Worker '{}' not found", worker_id),
            available,
            hint: Some(hint),
        }
    }

    /// Invalid argument or configuration value
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
            available: Vec::new(),
            hint: None,
        }
    }

    /// Tracker failure without an HTTP status (network, decode)
    pub fn collaborator(message: impl Into<String>) -> Self {
        Self::CollaboratorApi {
            status: None,
            message: message.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigMissing { .. } => "CONFIG_MISSING",
            Self::ConfigInvalid { .. } => "CONFIG_INVALID",
            Self::ProtocolTimeout { .. } => "PROTOCOL_TIMEOUT",
            Self::ProtocolInactive { .. } => "PROTOCOL_INACTIVE",
            Self::ProcessExit { .. } => "PROCESS_EXIT",
            Self::Rpc { .. } | Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::AgentFailed(_) => "AGENT_FAILED",
            Self::Session(_) => "SESSION_STATE",
            Self::Interrupted(_) => "INTERRUPTED",
            Self::CollaboratorApi { .. } => "COLLABORATOR_API_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) | Self::TomlDe(_) | Self::TomlSer(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Human recovery hint, when one applies
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::ConfigMissing { hint, .. } => Some(hint.clone()),
            Self::ConfigInvalid { hint, .. } => hint.clone(),
            Self::ProtocolInactive { .. } => {
                Some("Raise `inactivity_timeout_ms` if the agent legitimately works silently".to_string())
            }
            Self::Interrupted(_) => Some(
                "Run `a3s-conductor resume`, then the same epic again to continue from the checkpoint"
                    .to_string(),
            ),
            Self::CollaboratorApi { status: Some(401), .. } => {
                Some("Run `a3s-conductor auth --token <token>`".to_string())
            }
            _ => None,
        }
    }

    /// True for errors raised by one agent session (never fatal to a run)
    pub fn is_session_scoped(&self) -> bool {
        matches!(
            self,
            Self::ProtocolTimeout { .. }
                | Self::ProtocolInactive { .. }
                | Self::ProcessExit { .. }
                | Self::Rpc { .. }
                | Self::Protocol(_)
                | Self::AgentFailed(_)
        )
    }
}

/// The only error shape shown at the CLI boundary
#[derive(Debug, Clone, Serialize)]
pub struct StructuredError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available: Vec<String>,
}

impl From<&ConductorError> for StructuredError {
    fn from(err: &ConductorError) -> Self {
        let message = match err {
            // Pipe and parser details stay in the debug log
            ConductorError::Io(_) => "Local I/O operation failed".to_string(),
            ConductorError::Serialization(_) => "Failed to encode or decode data".to_string(),
            e if e.is_session_scoped() => match e {
                ConductorError::ProcessExit { code, .. } => {
                    format!("Agent process exited{} without a result", exit_suffix(code))
                }
                ConductorError::ProtocolTimeout { .. } | ConductorError::ProtocolInactive { .. } => {
                    e.to_string()
                }
                _ => "Agent protocol failure".to_string(),
            },
            e => e.to_string(),
        };
        let available = match err {
            ConductorError::ConfigInvalid { available, .. } => available.clone(),
            _ => Vec::new(),
        };
        Self {
            code: err.code(),
            message,
            hint: err.hint(),
            available,
        }
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error[{}]: {}", self.code, self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// Result type alias for conductor operations
pub type Result<T> = std::result::Result<T, ConductorError>;
