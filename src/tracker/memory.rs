//! In-process tracker for tests and dry runs

use super::{
    Briefing, ExecutionPlan, ItemKind, ItemStatus, StatusCategory, TrackedItem, TrackerClient,
};
use crate::error::{ConductorError, Result};
use async_trait::async_trait;
use std::sync::RwLock;

#[derive(Default)]
struct Inner {
    plan: Option<ExecutionPlan>,
    features: Vec<TrackedItem>,
    tasks: Vec<TrackedItem>,
    briefing: Option<Briefing>,
    started: Vec<String>,
    completed: Vec<String>,
    /// Mark calls fail while set (simulates a rejecting backend)
    reject_marks: bool,
}

/// Tracker backed by plain vectors
#[derive(Default)]
pub struct MemoryTracker {
    inner: RwLock<Inner>,
}

fn status(category: StatusCategory) -> ItemStatus {
    let name = match category {
        StatusCategory::Backlog => "Backlog",
        StatusCategory::Unstarted => "Todo",
        StatusCategory::Started => "In Progress",
        StatusCategory::Completed => "Done",
        StatusCategory::Canceled => "Canceled",
        StatusCategory::Unknown => "Unknown",
    };
    ItemStatus {
        name: name.to_string(),
        category,
    }
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker serving `plan`, with every planned item registered as "Todo"
    pub fn with_plan(plan: ExecutionPlan) -> Self {
        let tracker = Self::new();
        let mut features: Vec<String> = Vec::new();
        for item in plan.items() {
            if !features.contains(&item.feature_id) {
                features.push(item.feature_id.clone());
                tracker.add_feature(&item.feature_id, "Todo", StatusCategory::Unstarted);
            }
            if let Some(task) = &item.task_id {
                tracker.add_task(task, "Todo", StatusCategory::Unstarted);
            }
        }
        if let Ok(mut inner) = tracker.inner.write() {
            inner.plan = Some(plan);
        }
        tracker
    }

    pub fn add_feature(&self, identifier: &str, name: &str, category: StatusCategory) {
        self.upsert(ItemKind::Feature, identifier, name, category);
    }

    pub fn add_task(&self, identifier: &str, name: &str, category: StatusCategory) {
        self.upsert(ItemKind::Task, identifier, name, category);
    }

    pub fn set_briefing(&self, briefing: Briefing) {
        if let Ok(mut inner) = self.inner.write() {
            inner.briefing = Some(briefing);
        }
    }

    pub fn reject_marks(&self, reject: bool) {
        if let Ok(mut inner) = self.inner.write() {
            inner.reject_marks = reject;
        }
    }

    /// Identifiers passed to `mark_started`, in call order
    pub fn started(&self) -> Vec<String> {
        self.inner.read().map(|i| i.started.clone()).unwrap_or_default()
    }

    /// Identifiers passed to `mark_completed`, in call order
    pub fn completed(&self) -> Vec<String> {
        self.inner
            .read()
            .map(|i| i.completed.clone())
            .unwrap_or_default()
    }

    /// Current status of a feature or task
    pub fn status_of(&self, identifier: &str) -> Option<ItemStatus> {
        let inner = self.inner.read().ok()?;
        inner
            .features
            .iter()
            .chain(inner.tasks.iter())
            .find(|i| i.identifier == identifier)
            .map(|i| i.status.clone())
    }

    fn upsert(&self, kind: ItemKind, identifier: &str, name: &str, category: StatusCategory) {
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        let items = match kind {
            ItemKind::Feature => &mut inner.features,
            ItemKind::Task => &mut inner.tasks,
        };
        let status = ItemStatus {
            name: name.to_string(),
            category,
        };
        match items.iter_mut().find(|i| i.identifier == identifier) {
            Some(item) => item.status = status,
            None => items.push(TrackedItem {
                identifier: identifier.to_string(),
                title: String::new(),
                status,
            }),
        }
    }

    fn mark(&self, kind: ItemKind, identifier: &str, category: StatusCategory) -> Result<()> {
        let Ok(mut inner) = self.inner.write() else {
            return Err(ConductorError::collaborator("tracker state poisoned"));
        };
        if inner.reject_marks {
            return Err(ConductorError::CollaboratorApi {
                status: Some(503),
                message: format!("rejected update of {}", identifier),
            });
        }
        let items = match kind {
            ItemKind::Feature => &mut inner.features,
            ItemKind::Task => &mut inner.tasks,
        };
        let item = items
            .iter_mut()
            .find(|i| i.identifier == identifier)
            .ok_or_else(|| ConductorError::CollaboratorApi {
                status: Some(404),
                message: format!("{} {} not found", kind, identifier),
            })?;
        item.status = status(category);
        match category {
            StatusCategory::Completed => inner.completed.push(identifier.to_string()),
            _ => inner.started.push(identifier.to_string()),
        }
        Ok(())
    }
}

#[async_trait]
impl TrackerClient for MemoryTracker {
    async fn execution_plan(&self, epic_id: &str) -> Result<ExecutionPlan> {
        let inner = self
            .inner
            .read()
            .map_err(|_| ConductorError::collaborator("tracker state poisoned"))?;
        inner
            .plan
            .clone()
            .filter(|p| p.epic_id == epic_id)
            .ok_or_else(|| ConductorError::CollaboratorApi {
                status: Some(404),
                message: format!("epic {} not found", epic_id),
            })
    }

    async fn list_features(&self, _epic_id: &str) -> Result<Vec<TrackedItem>> {
        Ok(self
            .inner
            .read()
            .map(|i| i.features.clone())
            .unwrap_or_default())
    }

    async fn list_tasks(&self, _epic_id: &str) -> Result<Vec<TrackedItem>> {
        Ok(self.inner.read().map(|i| i.tasks.clone()).unwrap_or_default())
    }

    async fn mark_started(&self, kind: ItemKind, identifier: &str) -> Result<()> {
        self.mark(kind, identifier, StatusCategory::Started)
    }

    async fn mark_completed(&self, kind: ItemKind, identifier: &str) -> Result<()> {
        self.mark(kind, identifier, StatusCategory::Completed)
    }

    async fn briefing(&self, _epic_id: &str, _max_tokens: u32) -> Result<Option<Briefing>> {
        Ok(self.inner.read().ok().and_then(|i| i.briefing.clone()))
    }
}
