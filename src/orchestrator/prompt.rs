//! Prompt composition
//!
//! The orchestrator treats prompts as opaque strings; a [`PromptComposer`]
//! turns a plan item (plus the epic briefing, when there is one) into one.

use crate::tracker::{Briefing, ExecutionPlan, PlanItem};

pub trait PromptComposer: Send + Sync {
    fn compose(&self, plan: &ExecutionPlan, item: &PlanItem, briefing: Option<&Briefing>) -> String;
}

/// Plain-text task brief
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPromptComposer;

impl PromptComposer for DefaultPromptComposer {
    fn compose(&self, plan: &ExecutionPlan, item: &PlanItem, briefing: Option<&Briefing>) -> String {
        let mut prompt = format!(
            "You are working on epic {} ({}).\n\nYour assignment: {} {}",
            plan.epic_id,
            plan.epic_name,
            item.identifier(),
            item.title
        );
        if item.task_id.is_some() {
            prompt.push_str(&format!(" (part of feature {})", item.feature_id));
        }
        prompt.push('\n');

        if !item.dependencies.is_empty() {
            prompt.push_str(&format!(
                "\nThis builds on completed work: {}\n",
                item.dependencies.join(", ")
            ));
        }

        if let Some(briefing) = briefing.filter(|b| !b.briefing.trim().is_empty()) {
            prompt.push_str("\n## Context from earlier sessions\n\n");
            prompt.push_str(briefing.briefing.trim());
            prompt.push('\n');
        }

        prompt.push_str(&format!(
            "\nImplement {} completely, then update its status in the tracker.\n",
            item.identifier()
        ));
        prompt
    }
}
