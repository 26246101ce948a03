//! Blast-radius estimation before destructive bulk operations.
//!
//! For every requested id the analyzer concurrently resolves a display
//! name and counts direct dependents with the [`DependencyProbe`] selected
//! for the resource type. Per-id failures never abort the batch: a failed
//! name lookup yields the `"<Type> <id>"` fallback and a failed probe
//! counts as zero dependents.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use km_client::ResourceClient;
use km_core::naming::display_name;
use km_core::{ApiError, ResourceId, ResourceType};
use serde::Serialize;

/// Default number of ids analysed at once.
const DEFAULT_CONCURRENCY: usize = 5;

// ---------------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------------

/// Kind of dependent counted by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentKind {
    Cards,
    Boards,
    ChildCards,
    Comments,
    Subtasks,
}

impl DependentKind {
    pub fn noun(self, count: u64) -> &'static str {
        let one = count == 1;
        match self {
            Self::Cards => if one { "card" } else { "cards" },
            Self::Boards => if one { "board" } else { "boards" },
            Self::ChildCards => if one { "child card" } else { "child cards" },
            Self::Comments => if one { "comment" } else { "comments" },
            Self::Subtasks => if one { "subtask" } else { "subtasks" },
        }
    }
}

/// Type-specific dependent counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyProbe {
    /// Cards currently on a board.
    BoardCards,
    /// Child cards, comments and subtasks of a card.
    CardAttachments,
    /// Boards inside a workspace.
    WorkspaceBoards,
    /// Types whose deletion never cascades.
    NoDependents,
}

/// Dependent counts gathered by one probe run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeCount {
    /// Count per dependent kind, zero for kinds whose lookup failed.
    pub breakdown: Vec<(DependentKind, u64)>,
    /// Kinds whose lookup failed and were counted as zero.
    pub failed: Vec<DependentKind>,
}

impl ProbeCount {
    pub fn total(&self) -> u64 {
        self.breakdown.iter().map(|(_, n)| n).sum()
    }
}

impl DependencyProbe {
    /// The probe used for `resource_type`.
    pub fn for_type(resource_type: ResourceType) -> Self {
        match resource_type {
            ResourceType::Board => Self::BoardCards,
            ResourceType::Card => Self::CardAttachments,
            ResourceType::Workspace => Self::WorkspaceBoards,
            ResourceType::CustomField | ResourceType::User => Self::NoDependents,
        }
    }

    /// Count direct dependents of `id`.
    ///
    /// Each lookup is independent; a failing one contributes zero and is
    /// listed in [`ProbeCount::failed`].
    pub async fn count<C: ResourceClient>(self, client: &C, id: ResourceId) -> ProbeCount {
        let mut count = ProbeCount::default();
        match self {
            Self::BoardCards => {
                count.record(DependentKind::Cards, id, client.list_board_cards(id).await);
            }
            Self::WorkspaceBoards => {
                count.record(
                    DependentKind::Boards,
                    id,
                    client.list_workspace_boards(id).await,
                );
            }
            Self::CardAttachments => {
                let (children, comments, subtasks) = tokio::join!(
                    client.list_card_children(id),
                    client.list_card_comments(id),
                    client.list_card_subtasks(id),
                );
                count.record(DependentKind::ChildCards, id, children);
                count.record(DependentKind::Comments, id, comments);
                count.record(DependentKind::Subtasks, id, subtasks);
            }
            Self::NoDependents => {}
        }
        count
    }
}

impl ProbeCount {
    fn record<T>(&mut self, kind: DependentKind, id: ResourceId, result: Result<Vec<T>, ApiError>) {
        match result {
            Ok(items) => self.breakdown.push((kind, items.len() as u64)),
            Err(e) => {
                tracing::warn!(
                    id,
                    kind = ?kind,
                    error = %e,
                    "Dependency lookup failed, counting as zero"
                );
                self.breakdown.push((kind, 0));
                self.failed.push(kind);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Outcome of analysing one id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceImpact {
    pub id: ResourceId,
    /// Resolved name, or the `"<Type> <id>"` fallback.
    pub name: String,
    /// Whether `name` came from the remote resource.
    pub name_resolved: bool,
    pub dependents: ProbeCount,
}

impl ResourceImpact {
    pub fn impact(&self) -> u64 {
        self.dependents.total()
    }
}

/// Blast radius of one bulk request.
///
/// Built once, read-only afterwards. `resource_ids` keeps the caller's
/// input order and `name_map` has an entry for every one of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyAnalysis {
    resource_type: ResourceType,
    resource_ids: Vec<ResourceId>,
    name_map: BTreeMap<ResourceId, String>,
    resources_with_deps: Vec<ResourceId>,
    resources_without_deps: Vec<ResourceId>,
    total_impact: u64,
    impacts: Vec<ResourceImpact>,
}

impl DependencyAnalysis {
    /// Aggregate per-id impacts, kept in the given order.
    pub fn from_impacts(resource_type: ResourceType, impacts: Vec<ResourceImpact>) -> Self {
        let resource_ids = impacts.iter().map(|i| i.id).collect();
        let name_map = impacts.iter().map(|i| (i.id, i.name.clone())).collect();
        let (with, without): (Vec<&ResourceImpact>, Vec<&ResourceImpact>) =
            impacts.iter().partition(|i| i.impact() > 0);
        let total_impact = impacts.iter().map(ResourceImpact::impact).sum();

        Self {
            resource_type,
            resource_ids,
            name_map,
            resources_with_deps: with.into_iter().map(|i| i.id).collect(),
            resources_without_deps: without.into_iter().map(|i| i.id).collect(),
            total_impact,
            impacts,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn resource_ids(&self) -> &[ResourceId] {
        &self.resource_ids
    }

    pub fn name_map(&self) -> &BTreeMap<ResourceId, String> {
        &self.name_map
    }

    /// Name recorded for `id`, if `id` was part of the analysis.
    pub fn name_of(&self, id: ResourceId) -> Option<&str> {
        self.name_map.get(&id).map(String::as_str)
    }

    pub fn resources_with_deps(&self) -> &[ResourceId] {
        &self.resources_with_deps
    }

    pub fn resources_without_deps(&self) -> &[ResourceId] {
        &self.resources_without_deps
    }

    pub fn total_impact(&self) -> u64 {
        self.total_impact
    }

    pub fn impacts(&self) -> &[ResourceImpact] {
        &self.impacts
    }

    pub fn impact_of(&self, id: ResourceId) -> Option<&ResourceImpact> {
        self.impacts.iter().find(|i| i.id == id)
    }

    pub fn has_dependents(&self) -> bool {
        !self.resources_with_deps.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Runs name resolution and dependency probes for a batch of ids.
pub struct DependencyAnalyzer<C> {
    client: Arc<C>,
    concurrency: usize,
}

impl<C: ResourceClient> DependencyAnalyzer<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Limit how many ids are analysed at once (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Analyse `ids` of `resource_type`.
    ///
    /// Ids are processed concurrently in no particular completion order;
    /// the result lists them in input order.
    pub async fn analyze(
        &self,
        resource_type: ResourceType,
        ids: &[ResourceId],
    ) -> DependencyAnalysis {
        let probe = DependencyProbe::for_type(resource_type);

        let impacts: Vec<ResourceImpact> = stream::iter(ids.iter().copied())
            .map(|id| self.analyze_one(resource_type, probe, id))
            .buffered(self.concurrency)
            .collect()
            .await;

        let analysis = DependencyAnalysis::from_impacts(resource_type, impacts);
        tracing::info!(
            resource_type = %resource_type,
            requested = ids.len(),
            with_dependents = analysis.resources_with_deps().len(),
            total_impact = analysis.total_impact(),
            "Dependency analysis complete",
        );
        analysis
    }

    async fn analyze_one(
        &self,
        resource_type: ResourceType,
        probe: DependencyProbe,
        id: ResourceId,
    ) -> ResourceImpact {
        let client = self.client.as_ref();
        let (name, dependents) = tokio::join!(
            resolve_name(client, resource_type, id),
            probe.count(client, id),
        );
        let (name, name_resolved) = match name {
            Some(name) => (name, true),
            None => (resource_type.fallback_name(id), false),
        };
        ResourceImpact {
            id,
            name,
            name_resolved,
            dependents,
        }
    }
}

/// Best-effort display name lookup.
async fn resolve_name<C: ResourceClient>(
    client: &C,
    resource_type: ResourceType,
    id: ResourceId,
) -> Option<String> {
    match client.get_resource(resource_type, id).await {
        Ok(body) => display_name(resource_type, &body),
        Err(e) => {
            tracing::warn!(
                resource_type = %resource_type,
                id,
                error = %e,
                "Name lookup failed, using fallback"
            );
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
