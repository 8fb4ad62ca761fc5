//! Shared fixtures for the integration suites
//!
//! Fake agents are small `sh` scripts speaking the newline-delimited
//! protocol: they answer `initialize`, `session/new` and `session/load`
//! and differ only in how they handle `session/prompt`.

#![allow(dead_code)]

use a3s_conductor::tracker::{
    Briefing, ExecutionPlan, ItemKind, Phase, PlanItem, TrackedItem, TrackerClient,
};
use a3s_conductor::{AgentLauncher, MemoryTracker, Result};
use async_trait::async_trait;
use std::sync::Mutex;

const HEAD: &str = r#"
chunk() {
  printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"s-1","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"%s"}}}}\n' "$1"
}
finish() {
  printf '{"jsonrpc":"2.0","id":%s,"result":{"stopReason":"%s"}}\n' "$1" "$2"
}
held=""
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":1,"agentCapabilities":{"loadSession":true}}}\n' "$id" ;;
    *'"method":"session/new"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"sessionId":"s-1"}}\n' "$id" ;;
    *'"method":"session/load"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
"#;

const TAIL: &str = r#"
  esac
done
"#;

fn agent(prompt_arms: &str) -> AgentLauncher {
    AgentLauncher::shell([HEAD, prompt_arms, TAIL].concat())
}

const WORKER_ARMS: &str = r#"
    *'"method":"session/prompt"'*)
      sleep "${AGENT_DELAY:-0}"
      case "$line" in
        *FAIL-ME*)
          printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32000,"message":"task failed"}}\n' "$id" ;;
        *REFUSE-ME*)
          finish "$id" refusal ;;
        *)
          printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"s-1","update":{"sessionUpdate":"plan","entries":[{"content":"a","status":"completed"},{"content":"b","status":"pending"}]}}}\n'
          chunk "ok"
          finish "$id" end_turn ;;
      esac ;;
"#;

/// Answers every prompt with "ok" after `$AGENT_DELAY` seconds (default 0).
/// Prompts mentioning FAIL-ME get an error reply, REFUSE-ME a refusal.
pub fn worker_agent() -> AgentLauncher {
    agent(WORKER_ARMS)
}

/// `worker_agent` that takes `delay_secs` to come up before reading stdin
pub fn slow_start_agent(delay_secs: f64) -> AgentLauncher {
    let boot = format!("sleep {}\n", delay_secs);
    AgentLauncher::shell([boot.as_str(), HEAD, WORKER_ARMS, TAIL].concat())
}

/// `worker_agent` with a per-prompt delay
pub fn slow_agent(delay_secs: f64) -> AgentLauncher {
    worker_agent().with_env("AGENT_DELAY", delay_secs.to_string())
}

/// Holds the first prompt until `session/cancel` arrives, then answers it
/// as cancelled. A continuation prompt is answered with "resumed".
pub fn pause_aware_agent() -> AgentLauncher {
    agent(
        r#"
    *'"method":"session/cancel"'*)
      if [ -n "$held" ]; then finish "$held" cancelled; held=""; fi ;;
    *'"method":"session/prompt"'*)
      case "$line" in
        *Continue*) chunk "resumed"; finish "$id" end_turn ;;
        *) held="$id" ;;
      esac ;;
"#,
    )
}

/// Prints a successful terminal `result` record, then exits with code 2
pub fn result_then_exit_agent() -> AgentLauncher {
    agent(
        r#"
    *'"method":"session/prompt"'*)
      printf '{"type":"result","subtype":"success","is_error":false,"result":"all done"}\n'
      exit 2 ;;
"#,
    )
}

/// Prints a failed terminal `result` record and keeps running
pub fn error_result_agent() -> AgentLauncher {
    agent(
        r#"
    *'"method":"session/prompt"'*)
      printf '{"type":"result","subtype":"error_during_execution","is_error":true,"result":"tool crashed"}\n' ;;
"#,
    )
}

/// Exits with code 4 on the first prompt, without any result
pub fn crashing_agent() -> AgentLauncher {
    agent(
        r#"
    *'"method":"session/prompt"'*)
      echo "segfault in tool" >&2
      exit 4 ;;
"#,
    )
}

/// Withholds all output for two seconds before answering a prompt
pub fn silent_agent() -> AgentLauncher {
    agent(
        r#"
    *'"method":"session/prompt"'*)
      sleep 2
      finish "$id" end_turn ;;
"#,
    )
}

/// Streams four chunks 300 ms apart, then answers
pub fn chatty_agent() -> AgentLauncher {
    agent(
        r#"
    *'"method":"session/prompt"'*)
      for i in 1 2 3 4; do sleep 0.3; chunk "."; done
      finish "$id" end_turn ;;
"#,
    )
}

/// Asks for permission mid-turn and echoes the selected option id as its result
pub fn permission_agent() -> AgentLauncher {
    agent(
        r#"
    *'"method":"session/prompt"'*)
      printf '{"jsonrpc":"2.0","id":"perm-1","method":"session/request_permission","params":{"sessionId":"s-1","options":[{"optionId":"yes","name":"Allow","kind":"allow_once"},{"optionId":"no","name":"Reject","kind":"reject_once"}]}}\n'
      IFS= read -r reply
      opt=$(printf '%s' "$reply" | sed -n 's/.*"optionId":"\([^"]*\)".*/\1/p')
      chunk "$opt"
      finish "$id" end_turn ;;
"#,
    )
}

/// Sends a request the conductor does not serve and echoes the error code back
pub fn unknown_request_agent() -> AgentLauncher {
    agent(
        r#"
    *'"method":"session/prompt"'*)
      printf '{"jsonrpc":"2.0","id":"x-1","method":"terminal/create","params":{"command":"ls"}}\n'
      IFS= read -r reply
      code=$(printf '%s' "$reply" | sed -n 's/.*"code":\(-[0-9][0-9]*\).*/\1/p')
      chunk "$code"
      finish "$id" end_turn ;;
"#,
    )
}

/// Emits a response nobody asked for, a stderr line and a garbage line
/// before answering normally
pub fn noisy_agent() -> AgentLauncher {
    agent(
        r#"
    *'"method":"session/prompt"'*)
      printf '{"jsonrpc":"2.0","id":999,"result":{"stray":true}}\n'
      echo "warming up" >&2
      echo "this is not json"
      chunk "ok"
      finish "$id" end_turn ;;
"#,
    )
}

// ─── Plans ───────────────────────────────────────────────────────

pub fn task(feature: &str, task: &str, title: &str, deps: &[&str]) -> PlanItem {
    PlanItem {
        feature_id: feature.to_string(),
        task_id: Some(task.to_string()),
        title: title.to_string(),
        execution_order: 0,
        parallel_group: None,
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
    }
}

/// Plan with one phase per entry of `phases`; execution order follows position
pub fn plan(epic: &str, phases: Vec<Vec<PlanItem>>) -> ExecutionPlan {
    let mut order = 0;
    let phases = phases
        .into_iter()
        .map(|items| Phase {
            items: items
                .into_iter()
                .map(|mut item| {
                    order += 1;
                    item.execution_order = order;
                    item
                })
                .collect(),
        })
        .collect();
    ExecutionPlan {
        epic_id: epic.to_string(),
        epic_name: format!("{} epic", epic),
        phases,
    }
}

// ─── Recording tracker ───────────────────────────────────────────

/// MemoryTracker wrapper that logs every mark in one ordered journal
pub struct RecordingTracker {
    pub inner: MemoryTracker,
    journal: Mutex<Vec<String>>,
}

impl RecordingTracker {
    pub fn new(plan: ExecutionPlan) -> Self {
        Self {
            inner: MemoryTracker::with_plan(plan),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Entries like "start:ENG-1-1" and "done:ENG-1-1"
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.journal().iter().position(|e| e == entry)
    }

    fn log(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl TrackerClient for RecordingTracker {
    async fn execution_plan(&self, epic_id: &str) -> Result<ExecutionPlan> {
        self.inner.execution_plan(epic_id).await
    }

    async fn list_features(&self, epic_id: &str) -> Result<Vec<TrackedItem>> {
        self.inner.list_features(epic_id).await
    }

    async fn list_tasks(&self, epic_id: &str) -> Result<Vec<TrackedItem>> {
        self.inner.list_tasks(epic_id).await
    }

    async fn mark_started(&self, kind: ItemKind, identifier: &str) -> Result<()> {
        self.log(format!("start:{}", identifier));
        self.inner.mark_started(kind, identifier).await
    }

    async fn mark_completed(&self, kind: ItemKind, identifier: &str) -> Result<()> {
        self.log(format!("done:{}", identifier));
        self.inner.mark_completed(kind, identifier).await
    }

    async fn briefing(&self, epic_id: &str, max_tokens: u32) -> Result<Option<Briefing>> {
        self.inner.briefing(epic_id, max_tokens).await
    }
}
