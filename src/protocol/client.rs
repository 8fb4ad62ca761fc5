//! Agent protocol client
//!
//! Owns one agent process and speaks newline-delimited JSON-RPC over its
//! stdio. One reader task per stream decodes frames and either completes the
//! matching pending request or re-emits the frame as an [`AgentEvent`].
//!
//! Every in-flight request is raced against two independent timers: the
//! per-request deadline and an inactivity watchdog that is reset by any byte
//! the process writes to stdout or stderr.

use super::event::{
    message_chunk_text, AgentCapabilities, AgentEvent, EventKind, InitializeParams,
    InitializeResult, NewSessionResult, PromptTurn, RequestPermissionParams, StopReason,
};
use super::launcher::{AgentLauncher, ClientOptions};
use super::message::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ProtocolMessage, RequestId,
    StreamRecord, METHOD_NOT_FOUND,
};
use super::{
    INITIALIZE, SESSION_CANCEL, SESSION_LOAD, SESSION_NEW, SESSION_PROMPT,
    SESSION_REQUEST_PERMISSION, SESSION_UPDATE,
};
use crate::config::PermissionPolicy;
use crate::error::{ConductorError, Result};
use futures::StreamExt;
use pin_project_lite::pin_project;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Longest frame accepted from an agent
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// How long to wait for the exit status once stdout has closed
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Stderr lines kept for `ProcessExit` reports
const STDERR_TAIL_LINES: usize = 20;

pin_project! {
    /// Stamps the activity clock whenever the wrapped stream yields bytes
    struct ActivityReader<R> {
        #[pin]
        inner: R,
        activity: Arc<watch::Sender<Instant>>,
    }
}

impl<R: AsyncRead> AsyncRead for ActivityReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let poll = this.inner.poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            if buf.filled().len() > before {
                this.activity.send_replace(Instant::now());
            }
        }
        poll
    }
}

/// Exit status of the agent process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
}

struct Pending {
    method: String,
    tx: oneshot::Sender<Result<Value>>,
}

#[derive(Debug, Clone)]
struct TerminalResult {
    text: String,
    stop_reason: StopReason,
    is_error: bool,
}

impl TerminalResult {
    /// Normalised `session/prompt` result
    fn to_value(&self) -> Value {
        json!({ "stopReason": self.stop_reason, "result": self.text })
    }
}

#[derive(Default)]
struct TurnState {
    transcript: String,
    result: Option<TerminalResult>,
}

/// State shared between the client handle and its reader tasks
struct Shared {
    pending: Mutex<HashMap<RequestId, Pending>>,
    turn: Mutex<TurnState>,
    stderr_tail: Mutex<VecDeque<String>>,
    closed: AtomicBool,
    frames: AtomicU64,
}

impl Shared {
    async fn stderr_tail(&self) -> String {
        let tail = self.stderr_tail.lock().await;
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Client for one agent process
pub struct AgentProtocolClient {
    pid: Option<u32>,
    stdin_tx: mpsc::Sender<String>,
    shared: Arc<Shared>,
    events: broadcast::Sender<AgentEvent>,
    activity: watch::Receiver<Instant>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    kill_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    next_id: AtomicU64,
    capabilities: std::sync::RwLock<AgentCapabilities>,
    options: ClientOptions,
}

impl AgentProtocolClient {
    /// Spawn the agent process and start the reader, writer and reaper tasks
    pub async fn spawn(launcher: &AgentLauncher, options: ClientOptions) -> Result<Self> {
        let mut child = launcher.command().spawn().map_err(|e| {
            ConductorError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to spawn agent '{}': {}", launcher.command, e),
            ))
        })?;

        let pid = child.id();
        let missing = |name: &str| ConductorError::Protocol(format!("agent {} not piped", name));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(100);
        let (events, _) = broadcast::channel(options.event_capacity.max(16));
        let (activity_tx, activity_rx) = watch::channel(Instant::now());
        let activity_tx = Arc::new(activity_tx);
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            turn: Mutex::new(TurnState::default()),
            stderr_tail: Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)),
            closed: AtomicBool::new(false),
            frames: AtomicU64::new(0),
        });

        // Stdin writer
        let mut stdin_writer = stdin;
        tokio::spawn(async move {
            while let Some(msg) = stdin_rx.recv().await {
                if let Err(e) = stdin_writer.write_all(msg.as_bytes()).await {
                    tracing::debug!(error = %e, "Agent stdin closed");
                    break;
                }
                if let Err(e) = stdin_writer.flush().await {
                    tracing::debug!(error = %e, "Failed to flush agent stdin");
                    break;
                }
            }
        });

        // Reaper: owns the child; a kill request or a dropped client terminates it
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            let code = status.ok().and_then(|s| s.code());
            tracing::debug!(pid = ?pid, code = ?code, "Agent process exited");
            exit_tx.send_replace(Some(ExitInfo { code }));
        });

        // Stderr side channel
        let stderr_shared = shared.clone();
        let stderr_events = events.clone();
        let stderr_reader = ActivityReader {
            inner: stderr,
            activity: activity_tx.clone(),
        };
        tokio::spawn(async move {
            let mut lines = FramedRead::new(
                stderr_reader,
                LinesCodec::new_with_max_length(MAX_FRAME_BYTES),
            );
            while let Some(line) = lines.next().await {
                let Ok(line) = line else { continue };
                tracing::debug!(pid = ?pid, "agent stderr: {}", line);
                {
                    let mut tail = stderr_shared.stderr_tail.lock().await;
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.clone());
                }
                let _ = stderr_events.send(AgentEvent::Diagnostic { line });
            }
        });

        // Stdout protocol reader
        let dispatcher = Dispatcher {
            shared: shared.clone(),
            events: events.clone(),
            stdin_tx: stdin_tx.clone(),
            policy: options.permission_policy,
        };
        let stdout_reader = ActivityReader {
            inner: stdout,
            activity: activity_tx,
        };
        let reader_exit = exit_rx.clone();
        tokio::spawn(async move {
            let mut frames = FramedRead::new(
                stdout_reader,
                LinesCodec::new_with_max_length(MAX_FRAME_BYTES),
            );
            let mut after_error = false;
            loop {
                match frames.next().await {
                    Some(Ok(line)) => {
                        after_error = false;
                        dispatcher.handle_line(&line).await;
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        // The codec discards up to the next newline and keeps going
                        after_error = true;
                        tracing::warn!(pid = ?pid, "Dropping oversized agent frame");
                        dispatcher.emit(AgentEvent::Error {
                            message: format!("frame exceeded {} bytes", MAX_FRAME_BYTES),
                        });
                    }
                    Some(Err(LinesCodecError::Io(e))) => {
                        tracing::debug!(pid = ?pid, error = %e, "Agent stdout read failed");
                        break;
                    }
                    None if after_error => after_error = false,
                    None => break,
                }
            }
            dispatcher.on_stdout_closed(reader_exit).await;
        });

        tracing::debug!(pid = ?pid, command = %launcher.command, "Agent process spawned");

        Ok(Self {
            pid,
            stdin_tx,
            shared,
            events,
            activity: activity_rx,
            exit_rx,
            kill_tx: std::sync::Mutex::new(Some(kill_tx)),
            next_id: AtomicU64::new(1),
            capabilities: std::sync::RwLock::new(AgentCapabilities::default()),
            options,
        })
    }

    /// OS process id
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True until stdout closes or the process exits
    pub fn is_alive(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst) && self.exit_rx.borrow().is_none()
    }

    /// Exit status, once the process has been reaped
    pub fn exit_status(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    /// Number of frames received so far
    pub fn message_count(&self) -> u64 {
        self.shared.frames.load(Ordering::SeqCst)
    }

    /// Capabilities advertised in the `initialize` reply
    pub fn capabilities(&self) -> AgentCapabilities {
        self.capabilities
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Subscribe to every event
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Subscribe to one kind of event
    pub fn subscribe_kind(&self, kind: EventKind) -> impl Stream<Item = AgentEvent> + Send + Unpin {
        tokio_stream::StreamExt::filter_map(BroadcastStream::new(self.events.subscribe()), move |item| {
            item.ok().filter(|event: &AgentEvent| event.kind() == kind)
        })
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn exit_error(&self) -> ConductorError {
        ConductorError::ProcessExit {
            code: self.exit_status().and_then(|e| e.code),
            stderr: self.shared.stderr_tail().await,
        }
    }

    /// Send a request and wait for its response.
    ///
    /// The pending entry is removed whatever the outcome.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id();
        let frame = serde_json::to_string(&JsonRpcRequest::new(id.clone(), method, params))? + "\n";

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().await;
            if self.shared.closed.load(Ordering::SeqCst) {
                drop(pending);
                return Err(self.exit_error().await);
            }
            pending.insert(
                id.clone(),
                Pending {
                    method: method.to_string(),
                    tx,
                },
            );
        }

        if self.stdin_tx.send(frame).await.is_err() {
            self.shared.pending.lock().await.remove(&id);
            return Err(self.exit_error().await);
        }
        tracing::trace!(id = %id, method = %method, "Request sent");

        let started = Instant::now();
        let outcome = tokio::select! {
            res = rx => res.unwrap_or_else(|_| {
                Err(ConductorError::Protocol(format!("response channel for '{}' closed", method)))
            }),
            _ = tokio::time::sleep(timeout) => Err(ConductorError::ProtocolTimeout {
                method: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            idle = self.inactivity(started) => Err(ConductorError::ProtocolInactive {
                method: method.to_string(),
                idle_ms: idle.as_millis() as u64,
            }),
        };

        self.shared.pending.lock().await.remove(&id);
        if let Err(e) = &outcome {
            tracing::debug!(id = %id, method = %method, error = %e, "Request failed");
        }
        outcome
    }

    /// Resolves once no output has arrived for the inactivity limit,
    /// counting from the later of `started` and the last received byte
    async fn inactivity(&self, started: Instant) -> Duration {
        let Some(limit) = self.options.inactivity_timeout else {
            return std::future::pending().await;
        };
        let mut activity = self.activity.clone();
        let mut sender_alive = true;
        loop {
            let last = (*activity.borrow_and_update()).max(started);
            let deadline = last + limit;
            let now = Instant::now();
            if now >= deadline {
                return now - last;
            }
            if sender_alive {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    changed = activity.changed() => sender_alive = changed.is_ok(),
                }
            } else {
                tokio::time::sleep_until(deadline).await;
            }
        }
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(self.exit_error().await);
        }
        let frame = serde_json::to_string(&JsonRpcNotification::new(method, params))? + "\n";
        if self.stdin_tx.send(frame).await.is_err() {
            return Err(self.exit_error().await);
        }
        Ok(())
    }

    /// Handshake; records the agent's capabilities
    pub async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let value = self
            .request(
                INITIALIZE,
                Some(serde_json::to_value(&params)?),
                self.options.request_timeout,
            )
            .await?;
        let result: InitializeResult = serde_json::from_value(value)
            .map_err(|e| ConductorError::Protocol(format!("bad initialize result: {}", e)))?;
        if let Ok(mut caps) = self.capabilities.write() {
            *caps = result.agent_capabilities.clone();
        }
        tracing::debug!(
            pid = ?self.pid,
            load_session = result.agent_capabilities.load_session,
            "Agent initialized"
        );
        Ok(result)
    }

    /// Open a new agent-side session; returns its id
    pub async fn new_session(&self, cwd: &Path) -> Result<String> {
        let value = self
            .request(
                SESSION_NEW,
                Some(json!({ "cwd": cwd, "mcpServers": [] })),
                self.options.request_timeout,
            )
            .await?;
        let result: NewSessionResult = serde_json::from_value(value)
            .map_err(|e| ConductorError::Protocol(format!("bad session/new result: {}", e)))?;
        Ok(result.session_id)
    }

    /// Reopen an existing agent-side session (history is replayed as updates)
    pub async fn load_session(&self, session_id: &str, cwd: &Path) -> Result<()> {
        self.request(
            SESSION_LOAD,
            Some(json!({ "sessionId": session_id, "cwd": cwd, "mcpServers": [] })),
            self.options.request_timeout,
        )
        .await?;
        Ok(())
    }

    /// Run one prompt turn and return its final text
    pub async fn prompt(&self, session_id: &str, text: &str, timeout: Duration) -> Result<PromptTurn> {
        {
            let mut turn = self.shared.turn.lock().await;
            *turn = TurnState::default();
        }
        let value = self
            .request(
                SESSION_PROMPT,
                Some(json!({
                    "sessionId": session_id,
                    "prompt": [{ "type": "text", "text": text }],
                })),
                timeout,
            )
            .await?;

        let stop_reason = value
            .get("stopReason")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(StopReason::EndTurn);
        let text = match value.get("result").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => self.shared.turn.lock().await.transcript.clone(),
        };
        Ok(PromptTurn { stop_reason, text })
    }

    /// Ask the agent to stop the current turn
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        self.notify(SESSION_CANCEL, Some(json!({ "sessionId": session_id })))
            .await
    }

    /// Kill the process and wait for it to be reaped. Idempotent.
    pub async fn shutdown(&self) {
        let kill = self.kill_tx.lock().ok().and_then(|mut k| k.take());
        if let Some(tx) = kill {
            let _ = tx.send(());
        }
        let mut exit = self.exit_rx.clone();
        if tokio::time::timeout(EXIT_GRACE * 2, exit.wait_for(Option::is_some))
            .await
            .is_err()
        {
            tracing::warn!(pid = ?self.pid, "Agent process did not exit after kill");
        }

        // Children of the agent may keep stdout open; settle what is in flight now
        let drained: Vec<Pending> = {
            let mut pending = self.shared.pending.lock().await;
            self.shared.closed.store(true, Ordering::SeqCst);
            pending.drain().map(|(_, p)| p).collect()
        };
        if !drained.is_empty() {
            let code = self.exit_status().and_then(|e| e.code);
            let stderr = self.shared.stderr_tail().await;
            for p in drained {
                let _ = p.tx.send(Err(ConductorError::ProcessExit {
                    code,
                    stderr: stderr.clone(),
                }));
            }
        }
    }
}

/// Reader-side frame handling
struct Dispatcher {
    shared: Arc<Shared>,
    events: broadcast::Sender<AgentEvent>,
    stdin_tx: mpsc::Sender<String>,
    policy: PermissionPolicy,
}

impl Dispatcher {
    fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }

    async fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.shared.frames.fetch_add(1, Ordering::SeqCst);

        match ProtocolMessage::parse(line) {
            Ok(ProtocolMessage::Response(response)) => self.on_response(response).await,
            Ok(ProtocolMessage::Request(request)) => self.on_server_request(request).await,
            Ok(ProtocolMessage::Notification(notification)) => {
                self.on_notification(notification).await
            }
            Ok(ProtocolMessage::Record(record)) => self.on_record(record).await,
            Err(reason) => {
                tracing::warn!(reason = %reason, "Unparseable agent output");
                self.emit(AgentEvent::Diagnostic {
                    line: line.to_string(),
                });
            }
        }
    }

    async fn on_response(&self, response: JsonRpcResponse) {
        let pending = self.shared.pending.lock().await.remove(&response.id);
        let Some(pending) = pending else {
            tracing::warn!(id = %response.id, "Discarding unmatched response");
            return;
        };

        let outcome = match response.error {
            Some(error) => Err(ConductorError::Rpc {
                method: pending.method.clone(),
                code: error.code,
                message: error.message,
            }),
            None => {
                let result = response.result.unwrap_or(Value::Null);
                if pending.method == SESSION_PROMPT {
                    Ok(self.finish_prompt(&result).await)
                } else {
                    Ok(result)
                }
            }
        };
        let _ = pending.tx.send(outcome);
    }

    /// Record the terminal result of a prompt response and normalise it
    async fn finish_prompt(&self, result: &Value) -> Value {
        let stop_reason = result
            .get("stopReason")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(StopReason::EndTurn);
        let terminal = {
            let mut turn = self.shared.turn.lock().await;
            let terminal = TerminalResult {
                text: turn.transcript.clone(),
                stop_reason,
                is_error: false,
            };
            turn.result = Some(terminal.clone());
            terminal
        };
        self.emit(AgentEvent::Result {
            text: terminal.text.clone(),
            stop_reason,
            is_error: false,
        });
        terminal.to_value()
    }

    async fn on_server_request(&self, request: JsonRpcRequest) {
        let response = if request.method == SESSION_REQUEST_PERMISSION {
            let params = request.params.clone().unwrap_or(Value::Null);
            let parsed: RequestPermissionParams = serde_json::from_value(params.clone())
                .unwrap_or(RequestPermissionParams { options: Vec::new() });
            let allow = self.policy == PermissionPolicy::Allow;
            let choice = parsed.choose(allow);
            let outcome = match choice {
                Some(option) => json!({ "outcome": { "outcome": "selected", "optionId": option.option_id } }),
                None => json!({ "outcome": { "outcome": "cancelled" } }),
            };
            tracing::debug!(
                id = %request.id,
                granted = allow && choice.is_some(),
                "Answered permission request"
            );
            self.emit(AgentEvent::PermissionRequest {
                id: request.id.clone(),
                params,
                granted: allow && choice.is_some(),
            });
            JsonRpcResponse::success(request.id, outcome)
        } else {
            tracing::warn!(method = %request.method, "Unsupported agent request");
            JsonRpcResponse::failure(
                request.id,
                METHOD_NOT_FOUND,
                format!("Method not supported: {}", request.method),
            )
        };

        match serde_json::to_string(&response) {
            Ok(frame) => {
                let _ = self.stdin_tx.send(frame + "\n").await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode response to agent"),
        }
    }

    async fn on_notification(&self, notification: JsonRpcNotification) {
        let params = notification.params.unwrap_or(Value::Null);
        if notification.method != SESSION_UPDATE {
            self.emit(AgentEvent::System {
                message: notification.method,
                data: Some(params),
            });
            return;
        }

        let session_id = params
            .get("sessionId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let update = params.get("update").cloned().unwrap_or(Value::Null);
        if let Some(text) = message_chunk_text(&update) {
            self.shared.turn.lock().await.transcript.push_str(text);
            self.emit(AgentEvent::Text {
                text: text.to_string(),
            });
        }
        self.emit(AgentEvent::SessionUpdate { session_id, update });
    }

    async fn on_record(&self, record: StreamRecord) {
        match record {
            StreamRecord::System { subtype, message } => self.emit(AgentEvent::System {
                message: message.or(subtype).unwrap_or_else(|| "system".to_string()),
                data: None,
            }),
            record @ StreamRecord::Text { .. } => {
                if let Some(text) = record.text() {
                    self.shared.turn.lock().await.transcript.push_str(&text);
                    self.emit(AgentEvent::Text { text });
                }
            }
            StreamRecord::Result {
                subtype,
                is_error,
                result,
            } => self.on_terminal_record(subtype, is_error, result).await,
            StreamRecord::Error { message, error } => self.emit(AgentEvent::Error {
                message: message
                    .or_else(|| error.map(|e| e.to_string()))
                    .unwrap_or_else(|| "unknown agent error".to_string()),
            }),
        }
    }

    /// A `result` record ends the turn: pending prompts settle now, and the
    /// result stays authoritative if the process exits afterwards
    async fn on_terminal_record(&self, subtype: Option<String>, is_error: bool, result: Option<String>) {
        let terminal = {
            let mut turn = self.shared.turn.lock().await;
            let text = result.unwrap_or_else(|| turn.transcript.clone());
            let terminal = TerminalResult {
                text,
                stop_reason: StopReason::EndTurn,
                is_error,
            };
            turn.result = Some(terminal.clone());
            terminal
        };
        self.emit(AgentEvent::Result {
            text: terminal.text.clone(),
            stop_reason: terminal.stop_reason,
            is_error,
        });

        let prompts: Vec<Pending> = {
            let mut pending = self.shared.pending.lock().await;
            let ids: Vec<RequestId> = pending
                .iter()
                .filter(|(_, p)| p.method == SESSION_PROMPT)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        for p in prompts {
            let outcome = if is_error {
                Err(ConductorError::AgentFailed(if terminal.text.is_empty() {
                    subtype.clone().unwrap_or_else(|| "error".to_string())
                } else {
                    terminal.text.clone()
                }))
            } else {
                Ok(terminal.to_value())
            };
            let _ = p.tx.send(outcome);
        }
    }

    /// Settle everything still pending once the process is gone
    async fn on_stdout_closed(&self, mut exit_rx: watch::Receiver<Option<ExitInfo>>) {
        let code = match tokio::time::timeout(EXIT_GRACE, exit_rx.wait_for(Option::is_some)).await {
            Ok(Ok(info)) => (*info).and_then(|i| i.code),
            _ => None,
        };
        let stderr = self.shared.stderr_tail().await;
        let result = self.shared.turn.lock().await.result.clone();

        let drained: Vec<Pending> = {
            let mut pending = self.shared.pending.lock().await;
            self.shared.closed.store(true, Ordering::SeqCst);
            pending.drain().map(|(_, p)| p).collect()
        };

        tracing::debug!(code = ?code, pending = drained.len(), "Agent stdout closed");
        for p in drained {
            let outcome = match &result {
                Some(r) if p.method == SESSION_PROMPT && !r.is_error => Ok(r.to_value()),
                _ => Err(ConductorError::ProcessExit {
                    code,
                    stderr: stderr.clone(),
                }),
            };
            let _ = p.tx.send(outcome);
        }
    }
}
