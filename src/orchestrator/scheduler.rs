//! Dependency-aware ready queue
//!
//! Items are offered in plan order (phase, then execution order). An item is
//! ready once every dependency it names has succeeded; a dependency that
//! names a feature waits for all of that feature's items. Identifiers that
//! are not part of the plan count as satisfied. When a dependency fails, its
//! dependents become blocked so the run can still terminate.

use crate::reconcile::ExpectedItemResult;
use crate::tracker::{ExecutionPlan, PlanItem};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Blocked,
}

impl ItemState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Blocked)
    }

    fn is_unsuccessful(self) -> bool {
        matches!(self, Self::Failed | Self::Blocked)
    }
}

/// Item counts across the whole plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanProgress {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl PlanProgress {
    /// Share of items in a terminal state, 0-100
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (((self.succeeded + self.failed + self.blocked) * 100) / self.total) as u8
    }
}

pub struct Scheduler {
    items: Vec<PlanItem>,
    states: Vec<ItemState>,
    by_id: HashMap<String, usize>,
    by_feature: HashMap<String, Vec<usize>>,
}

impl Scheduler {
    pub fn new(plan: &ExecutionPlan) -> Self {
        let mut ordered: Vec<(usize, &PlanItem)> = plan
            .phases
            .iter()
            .enumerate()
            .flat_map(|(phase, p)| p.items.iter().map(move |item| (phase, item)))
            .collect();
        ordered.sort_by_key(|(phase, item)| (*phase, item.execution_order));

        let mut items = Vec::with_capacity(ordered.len());
        let mut by_id = HashMap::new();
        let mut by_feature: HashMap<String, Vec<usize>> = HashMap::new();
        for (_, item) in ordered {
            if by_id.contains_key(item.identifier()) {
                tracing::warn!(identifier = %item.identifier(), "Duplicate plan item ignored");
                continue;
            }
            let index = items.len();
            by_id.insert(item.identifier().to_string(), index);
            by_feature
                .entry(item.feature_id.clone())
                .or_default()
                .push(index);
            items.push(item.clone());
        }

        Self {
            states: vec![ItemState::Pending; items.len()],
            items,
            by_id,
            by_feature,
        }
    }

    /// Apply outcomes from an earlier, interrupted run
    pub fn restore(&mut self, outcomes: &[ExpectedItemResult]) {
        for outcome in outcomes {
            if let Some(&index) = self.by_id.get(&outcome.identifier) {
                self.states[index] = if outcome.success {
                    ItemState::Succeeded
                } else {
                    ItemState::Failed
                };
            }
        }
        self.propagate_blocked();
    }

    pub fn item(&self, identifier: &str) -> Option<&PlanItem> {
        self.by_id.get(identifier).map(|&i| &self.items[i])
    }

    pub fn state(&self, identifier: &str) -> Option<ItemState> {
        self.by_id.get(identifier).map(|&i| self.states[i])
    }

    /// Indexes a dependency resolves to; empty when it is outside the plan
    fn resolve(&self, dependency: &str) -> Vec<usize> {
        if let Some(&index) = self.by_id.get(dependency) {
            return vec![index];
        }
        self.by_feature.get(dependency).cloned().unwrap_or_default()
    }

    /// A dependency on the item's own feature means the feature's other items
    fn is_ready(&self, index: usize) -> bool {
        self.items[index].dependencies.iter().all(|dep| {
            self.resolve(dep)
                .into_iter()
                .filter(|&d| d != index)
                .all(|d| self.states[d] == ItemState::Succeeded)
        })
    }

    fn dependency_failed(&self, index: usize) -> bool {
        self.items[index].dependencies.iter().any(|dep| {
            self.resolve(dep)
                .into_iter()
                .any(|d| self.states[d].is_unsuccessful())
        })
    }

    /// Block every pending item downstream of a failure; returns their ids
    fn propagate_blocked(&mut self) -> Vec<String> {
        let mut blocked = Vec::new();
        loop {
            let next: Vec<usize> = (0..self.items.len())
                .filter(|&i| self.states[i] == ItemState::Pending && self.dependency_failed(i))
                .collect();
            if next.is_empty() {
                return blocked;
            }
            for i in next {
                self.states[i] = ItemState::Blocked;
                blocked.push(self.items[i].identifier().to_string());
            }
        }
    }

    /// Take the first ready item in plan order and mark it running
    pub fn next_ready(&mut self) -> Option<PlanItem> {
        let index = (0..self.items.len())
            .find(|&i| self.states[i] == ItemState::Pending && self.is_ready(i))?;
        self.states[index] = ItemState::Running;
        Some(self.items[index].clone())
    }

    /// Record a finished item. Returns identifiers newly blocked by a failure.
    pub fn complete(&mut self, identifier: &str, success: bool) -> Vec<String> {
        let Some(&index) = self.by_id.get(identifier) else {
            return Vec::new();
        };
        self.states[index] = if success {
            ItemState::Succeeded
        } else {
            ItemState::Failed
        };
        if success {
            Vec::new()
        } else {
            self.propagate_blocked()
        }
    }

    /// Block pending items that can never become ready (dependency cycles).
    /// Only meaningful when nothing is running.
    pub fn block_stalled(&mut self) -> Vec<String> {
        if self.states.contains(&ItemState::Running) {
            return Vec::new();
        }
        let stalled: Vec<usize> = (0..self.items.len())
            .filter(|&i| self.states[i] == ItemState::Pending && !self.is_ready(i))
            .collect();
        if stalled.len() != self.states.iter().filter(|s| **s == ItemState::Pending).count() {
            return Vec::new();
        }
        stalled
            .into_iter()
            .map(|i| {
                self.states[i] = ItemState::Blocked;
                self.items[i].identifier().to_string()
            })
            .collect()
    }

    /// Every item reached a terminal state
    pub fn is_done(&self) -> bool {
        self.states.iter().all(|s| s.is_terminal())
    }

    /// `Some(true)` once every item of the feature succeeded, `Some(false)`
    /// once all are terminal with at least one unsuccessful, else `None`
    pub fn feature_status(&self, feature_id: &str) -> Option<bool> {
        let indexes = self.by_feature.get(feature_id)?;
        if !indexes.iter().all(|&i| self.states[i].is_terminal()) {
            return None;
        }
        Some(indexes.iter().all(|&i| self.states[i] == ItemState::Succeeded))
    }

    pub fn progress(&self) -> PlanProgress {
        let mut progress = PlanProgress {
            total: self.items.len(),
            ..Default::default()
        };
        for state in &self.states {
            match state {
                ItemState::Pending => progress.pending += 1,
                ItemState::Running => progress.running += 1,
                ItemState::Succeeded => progress.succeeded += 1,
                ItemState::Failed => progress.failed += 1,
                ItemState::Blocked => progress.blocked += 1,
            }
        }
        progress
    }
}
