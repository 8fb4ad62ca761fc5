//! Typed agent events and protocol payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::RequestId;

/// Everything an agent process tells the conductor, other than matched responses
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Assistant text (message chunk or stream text record)
    Text { text: String },
    /// Informational record or unrecognised notification
    System { message: String, data: Option<Value> },
    /// One line of the agent's stderr (or an unparseable stdout line)
    Diagnostic { line: String },
    /// The agent reported an error that is not tied to a request
    Error { message: String },
    /// Server-initiated permission request (already answered per policy)
    PermissionRequest {
        id: RequestId,
        params: Value,
        granted: bool,
    },
    /// `session/update` notification
    SessionUpdate { session_id: String, update: Value },
    /// Terminal result of a prompt turn
    Result {
        text: String,
        stop_reason: StopReason,
        is_error: bool,
    },
}

/// Discriminant used to subscribe to one kind of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Text,
    System,
    Diagnostic,
    Error,
    PermissionRequest,
    SessionUpdate,
    Result,
}

impl AgentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Text { .. } => EventKind::Text,
            Self::System { .. } => EventKind::System,
            Self::Diagnostic { .. } => EventKind::Diagnostic,
            Self::Error { .. } => EventKind::Error,
            Self::PermissionRequest { .. } => EventKind::PermissionRequest,
            Self::SessionUpdate { .. } => EventKind::SessionUpdate,
            Self::Result { .. } => EventKind::Result,
        }
    }
}

/// Why a prompt turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    MaxTurnRequests,
    Refusal,
    Cancelled,
    #[serde(other)]
    Other,
}

impl StopReason {
    /// Turns that ended this way produced a usable result
    pub fn is_success(self) -> bool {
        matches!(self, Self::EndTurn | Self::MaxTokens | Self::MaxTurnRequests | Self::Other)
    }
}

/// Outcome of one `session/prompt` turn
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTurn {
    pub stop_reason: StopReason,
    pub text: String,
}

// ============================================================================
// Initialize / sessions
// ============================================================================

/// Protocol version sent in `initialize`
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsCapabilities {
    #[serde(default)]
    pub read_text_file: bool,
    #[serde(default)]
    pub write_text_file: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    #[serde(default)]
    pub fs: FsCapabilities,
    #[serde(default)]
    pub terminal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: u32,
    pub client_capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            client_capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "a3s-conductor".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    #[serde(default)]
    pub load_session: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<Value>,
    #[serde(default)]
    pub agent_capabilities: AgentCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResult {
    pub session_id: String,
}

// ============================================================================
// Permissions
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    pub option_id: String,
    #[serde(default)]
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPermissionParams {
    #[serde(default)]
    pub options: Vec<PermissionOption>,
}

impl RequestPermissionParams {
    /// Pick the option matching `allow`, preferring one-shot grants
    pub fn choose(&self, allow: bool) -> Option<&PermissionOption> {
        let prefix = if allow { "allow" } else { "reject" };
        let once = format!("{}_once", prefix);
        self.options
            .iter()
            .find(|o| o.kind == once)
            .or_else(|| self.options.iter().find(|o| o.kind.starts_with(prefix)))
    }
}

/// Progress percentage from a `plan` session update, if it is one
pub fn plan_progress(update: &Value) -> Option<u8> {
    if update.get("sessionUpdate").and_then(Value::as_str) != Some("plan") {
        return None;
    }
    let entries = update.get("entries")?.as_array()?;
    if entries.is_empty() {
        return Some(0);
    }
    let done = entries
        .iter()
        .filter(|e| e.get("status").and_then(Value::as_str) == Some("completed"))
        .count();
    Some(((done * 100) / entries.len()) as u8)
}

/// Text of an `agent_message_chunk` session update
pub fn message_chunk_text(update: &Value) -> Option<&str> {
    if update.get("sessionUpdate").and_then(Value::as_str) != Some("agent_message_chunk") {
        return None;
    }
    let content = update.get("content")?;
    if content.get("type").and_then(Value::as_str) != Some("text") {
        return None;
    }
    content.get("text").and_then(Value::as_str)
}
