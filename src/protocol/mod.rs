//! Agent protocol
//!
//! JSON-RPC 2.0 over the stdio of an external coding agent, using the Agent
//! Client Protocol method set. Stream-style `type`-tagged records are accepted
//! on the same channel.

pub mod client;
pub mod event;
pub mod launcher;
pub mod message;

pub use client::{AgentProtocolClient, ExitInfo};
pub use event::{
    plan_progress, AgentCapabilities, AgentEvent, EventKind, InitializeParams, InitializeResult,
    PromptTurn, StopReason,
};
pub use launcher::{AgentLauncher, ClientOptions};
pub use message::{ProtocolMessage, RequestId, StreamRecord};

pub const INITIALIZE: &str = "initialize";
pub const SESSION_NEW: &str = "session/new";
pub const SESSION_LOAD: &str = "session/load";
pub const SESSION_PROMPT: &str = "session/prompt";
pub const SESSION_CANCEL: &str = "session/cancel";
pub const SESSION_UPDATE: &str = "session/update";
pub const SESSION_REQUEST_PERMISSION: &str = "session/request_permission";
