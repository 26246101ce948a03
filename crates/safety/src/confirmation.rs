//! Confirmation gating and post-execution summaries.
//!
//! Every function here works from names resolved during dependency
//! analysis. Nothing in this module talks to the remote API, so reporting
//! on deleted resources can never trigger a read of an id that is gone.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use km_core::{ResourceId, ResourceType};
use serde::Serialize;

use crate::dependency::{DependencyAnalysis, ResourceImpact};
use crate::executor::BulkItemResult;
use crate::operation::BulkAction;

/// Id to display name, as resolved before execution.
pub type NameMap = BTreeMap<ResourceId, String>;

/// Hint appended to every confirmation prompt.
const RERUN_HINT: &str =
    "To proceed, re-run the same request with analyze_dependencies=false.";

// ---------------------------------------------------------------------------
// Pre-execution
// ---------------------------------------------------------------------------

/// Whether a destructive request may proceed, and what to tell the caller
/// if it may not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationDecision {
    pub has_confirmation: bool,
    pub message: String,
    pub resources_with_deps: Vec<ResourceId>,
    pub resources_without_deps: Vec<ResourceId>,
    pub total_impact: u64,
}

/// Pre-execution report shape returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreflightReport {
    pub requires_confirmation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_message: Option<String>,
    pub resources_with_dependencies: Vec<ResourceId>,
    pub resources_without_dependencies: Vec<ResourceId>,
    pub total_impact: u64,
}

impl PreflightReport {
    /// Report for `analysis`, carrying the prompt when one is needed.
    pub fn from_analysis(analysis: &DependencyAnalysis, action: BulkAction) -> Self {
        let decision = build_confirmation(analysis, action);
        Self {
            requires_confirmation: decision.is_some(),
            confirmation_message: decision.map(|d| d.message),
            resources_with_dependencies: analysis.resources_with_deps().to_vec(),
            resources_without_dependencies: analysis.resources_without_deps().to_vec(),
            total_impact: analysis.total_impact(),
        }
    }
}

/// Decide whether `action` over `analysis` needs explicit confirmation.
///
/// Returns `None` when no targeted resource has dependents; the caller
/// proceeds without prompting.
pub fn build_confirmation(
    analysis: &DependencyAnalysis,
    action: BulkAction,
) -> Option<ConfirmationDecision> {
    if !analysis.has_dependents() {
        return None;
    }

    let resource_type = analysis.resource_type();
    let targeted = analysis.resource_ids().len();
    let with = analysis.resources_with_deps();
    let without = analysis.resources_without_deps();
    let total = analysis.total_impact();

    let mut message = format!(
        "{} {targeted} {} will {} {}.\n",
        action.gerund(),
        resource_type.noun(targeted),
        consequence(action),
        impact_phrase(analysis),
    );
    let _ = writeln!(
        message,
        "{} of {targeted} {} {} dependents:",
        with.len(),
        resource_type.noun(targeted),
        if with.len() == 1 { "has" } else { "have" },
    );
    for impact in analysis.impacts().iter().filter(|i| i.impact() > 0) {
        let _ = writeln!(message, "- {}", describe_impact(impact));
    }
    if !without.is_empty() {
        let _ = writeln!(
            message,
            "{} {} no dependents.",
            without.len(),
            if without.len() == 1 { "has" } else { "have" },
        );
    }
    let _ = writeln!(message, "Total impact: {total}");
    message.push_str(RERUN_HINT);

    Some(ConfirmationDecision {
        has_confirmation: true,
        message,
        resources_with_deps: with.to_vec(),
        resources_without_deps: without.to_vec(),
        total_impact: total,
    })
}

fn consequence(action: BulkAction) -> &'static str {
    match action {
        BulkAction::Delete => "remove",
        BulkAction::Archive => "hide",
        BulkAction::Update => "touch",
    }
}

/// `47 cards` when every dependent is of one kind, else `47 dependent items`.
fn impact_phrase(analysis: &DependencyAnalysis) -> String {
    let total = analysis.total_impact();
    let mut kinds = analysis
        .impacts()
        .iter()
        .flat_map(|i| i.dependents.breakdown.iter())
        .filter(|(_, n)| *n > 0)
        .map(|(kind, _)| *kind);
    let first = kinds.next();
    match first {
        Some(kind) if kinds.all(|k| k == kind) => format!("{total} {}", kind.noun(total)),
        _ if total == 1 => "1 dependent item".to_string(),
        _ => format!("{total} dependent items"),
    }
}

/// `Roadmap (#4): 12 cards` or `Epic (#9): 2 child cards, 3 comments`.
fn describe_impact(impact: &ResourceImpact) -> String {
    let parts: Vec<String> = impact
        .dependents
        .breakdown
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(kind, n)| format!("{n} {}", kind.noun(*n)))
        .collect();
    format!("{} (#{}): {}", impact.name, impact.id, parts.join(", "))
}

// ---------------------------------------------------------------------------
// Post-execution
// ---------------------------------------------------------------------------

/// Name for `id`, or `Resource ID: <id>` when none was resolved.
pub fn resource_label(names: &NameMap, id: ResourceId) -> String {
    names
        .get(&id)
        .cloned()
        .unwrap_or_else(|| format!("Resource ID: {id}"))
}

/// Summary for a run in which every item succeeded.
pub fn format_simple_success(
    resource_type: ResourceType,
    action: BulkAction,
    resources: &[ResourceId],
    names: &NameMap,
) -> String {
    let count = resources.len();
    let mut out = format!(
        "Successfully {} {count} {}:",
        action.past_tense(),
        resource_type.noun(count),
    );
    for id in resources {
        let _ = write!(out, "\n- {}", resource_label(names, *id));
    }
    out
}

/// Summary for a run with at least one failure.
///
/// `failures` pairs each failed id with its reason.
pub fn format_partial_success(
    resource_type: ResourceType,
    action: BulkAction,
    successes: &[ResourceId],
    failures: &[(ResourceId, String)],
    names: &NameMap,
) -> String {
    let total = successes.len() + failures.len();
    let mut out = format!(
        "{} {total} {}: {} succeeded, {} failed",
        action.gerund(),
        resource_type.noun(total),
        successes.len(),
        failures.len(),
    );
    if !successes.is_empty() {
        let _ = write!(out, "\n\n{}:", capitalize(action.past_tense()));
        for id in successes {
            let _ = write!(out, "\n- {}", resource_label(names, *id));
        }
    }
    let _ = write!(out, "\n\nFailed:");
    for (id, reason) in failures {
        let _ = write!(out, "\n- {}: {reason}", resource_label(names, *id));
    }
    out
}

/// Pick the simple or partial summary for `results`.
pub fn summarize(
    resource_type: ResourceType,
    action: BulkAction,
    results: &[BulkItemResult],
    names: &NameMap,
) -> String {
    let successes: Vec<ResourceId> = results.iter().filter(|r| r.success).map(|r| r.id).collect();
    let failures: Vec<(ResourceId, String)> = results
        .iter()
        .filter(|r| !r.success)
        .map(|r| {
            let reason = r.error.clone().unwrap_or_else(|| "unknown error".to_string());
            (r.id, reason)
        })
        .collect();

    if failures.is_empty() {
        format_simple_success(resource_type, action, &successes, names)
    } else {
        format_partial_success(resource_type, action, &successes, &failures, names)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
