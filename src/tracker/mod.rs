//! Work-tracking backend
//!
//! The conductor consumes the tracker only through [`TrackerClient`]: the
//! execution plan for an epic, feature/task status, start/complete marks and
//! a token-budgeted briefing.

pub mod http;
pub mod memory;

pub use http::HttpTrackerClient;
pub use memory::MemoryTracker;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Dependency-ordered phases of an epic's work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub epic_id: String,
    #[serde(default)]
    pub epic_name: String,
    #[serde(default)]
    pub phases: Vec<Phase>,
}

impl ExecutionPlan {
    /// Every item in plan order
    pub fn items(&self) -> impl Iterator<Item = &PlanItem> {
        self.phases.iter().flat_map(|p| p.items.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    #[serde(default)]
    pub items: Vec<PlanItem>,
}

/// One schedulable unit: a task, or a feature without tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    pub feature_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub execution_order: u32,
    #[serde(default)]
    pub parallel_group: Option<u32>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl PlanItem {
    /// Identifier this item is scheduled and reported under
    pub fn identifier(&self) -> &str {
        self.task_id.as_deref().unwrap_or(&self.feature_id)
    }

    pub fn kind(&self) -> ItemKind {
        if self.task_id.is_some() {
            ItemKind::Task
        } else {
            ItemKind::Feature
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Feature,
    Task,
}

impl ItemKind {
    /// REST collection name
    pub fn collection(self) -> &'static str {
        match self {
            Self::Feature => "features",
            Self::Task => "tasks",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Feature => f.write_str("feature"),
            Self::Task => f.write_str("task"),
        }
    }
}

/// Workflow category behind a status label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    Backlog,
    Unstarted,
    Started,
    Completed,
    Canceled,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStatus {
    /// Display label, e.g. "In Progress" or "Done"
    pub name: String,
    pub category: StatusCategory,
}

/// A feature or task as the tracker currently records it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedItem {
    pub identifier: String,
    #[serde(default)]
    pub title: String,
    pub status: ItemStatus,
}

/// Cross-session context for an epic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Briefing {
    pub briefing: String,
    #[serde(default)]
    pub token_count: u32,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Narrow client for the work-tracking backend
#[async_trait]
pub trait TrackerClient: Send + Sync {
    async fn execution_plan(&self, epic_id: &str) -> Result<ExecutionPlan>;

    async fn list_features(&self, epic_id: &str) -> Result<Vec<TrackedItem>>;

    async fn list_tasks(&self, epic_id: &str) -> Result<Vec<TrackedItem>>;

    async fn mark_started(&self, kind: ItemKind, identifier: &str) -> Result<()>;

    async fn mark_completed(&self, kind: ItemKind, identifier: &str) -> Result<()>;

    /// `Ok(None)` when no briefing is available; only hard failures are errors
    async fn briefing(&self, epic_id: &str, max_tokens: u32) -> Result<Option<Briefing>>;
}
