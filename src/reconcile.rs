//! Post-run audit of claimed outcomes
//!
//! An agent reporting success does not prove that the tracker recorded it.
//! `reconcile` compares every claimed success against the tracker's live
//! status and returns the mismatches as data.

use crate::error::Result;
use crate::tracker::{ItemKind, StatusCategory, TrackedItem, TrackerClient};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status label expected for a successfully finished item
pub const EXPECTED_DONE: &str = "Done";

/// Reported for identifiers the tracker does not know
pub const NOT_FOUND: &str = "Not Found";

/// The conductor's claim about one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedItemResult {
    pub identifier: String,
    pub success: bool,
}

impl ExpectedItemResult {
    pub fn new(identifier: impl Into<String>, success: bool) -> Self {
        Self {
            identifier: identifier.into(),
            success,
        }
    }
}

/// A claimed success the tracker disagrees with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub identifier: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub clean: bool,
    pub discrepancies: Vec<Discrepancy>,
    pub total_features: usize,
    pub total_tasks: usize,
}

/// Compare claimed successes against the tracker's current state.
///
/// Entries with `success == false` are not evaluated. Only failing to reach
/// the tracker is an error; mismatches are returned in the report.
pub async fn reconcile(
    tracker: &dyn TrackerClient,
    epic_id: &str,
    expected: &[ExpectedItemResult],
) -> Result<ReconciliationReport> {
    let (features, tasks) =
        futures::try_join!(tracker.list_features(epic_id), tracker.list_tasks(epic_id))?;

    let by_id = |items: &[TrackedItem]| -> HashMap<String, TrackedItem> {
        items
            .iter()
            .map(|i| (i.identifier.clone(), i.clone()))
            .collect()
    };
    let feature_map = by_id(&features);
    let task_map = by_id(&tasks);

    let mut discrepancies = Vec::new();
    for claim in expected.iter().filter(|e| e.success) {
        let found = feature_map
            .get(&claim.identifier)
            .map(|i| (ItemKind::Feature, i))
            .or_else(|| task_map.get(&claim.identifier).map(|i| (ItemKind::Task, i)));

        match found {
            Some((_, item)) if item.status.category == StatusCategory::Completed => {}
            Some((kind, item)) => discrepancies.push(Discrepancy {
                kind,
                identifier: claim.identifier.clone(),
                expected: EXPECTED_DONE.to_string(),
                actual: item.status.name.clone(),
            }),
            None => discrepancies.push(Discrepancy {
                kind: ItemKind::Task,
                identifier: claim.identifier.clone(),
                expected: EXPECTED_DONE.to_string(),
                actual: NOT_FOUND.to_string(),
            }),
        }
    }

    for d in &discrepancies {
        tracing::warn!(
            kind = %d.kind,
            identifier = %d.identifier,
            actual = %d.actual,
            "Reconciliation discrepancy"
        );
    }

    Ok(ReconciliationReport {
        clean: discrepancies.is_empty(),
        discrepancies,
        total_features: features.len(),
        total_tasks: tasks.len(),
    })
}
