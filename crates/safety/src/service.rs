//! Entry point for bulk mutations.
//!
//! A request is validated, analysed for dependents when destructive,
//! gated on confirmation, executed and then summarised from names that
//! were resolved before anything was mutated.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use km_client::ResourceClient;
use km_core::config::MediatorConfig;
use km_core::naming::display_name;
use km_core::{CoreError, ResourceId, ResourceType, Timestamp};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::confirmation::{self, NameMap, PreflightReport};
use crate::dependency::{DependencyAnalysis, DependencyAnalyzer};
use crate::executor::{BulkExecutor, BulkItemResult};
use crate::operation::{BulkAction, BulkOperation};

/// Largest number of ids accepted in one bulk request.
pub const MAX_BULK_ITEMS: usize = 50;

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

/// One bulk mutation request.
#[derive(Debug, Clone)]
pub struct BulkRequest {
    pub resource_type: ResourceType,
    pub operation: BulkOperation,
    pub ids: Vec<ResourceId>,
    /// Run dependency analysis (and the confirmation gate) before a
    /// destructive operation. Defaults to `true`.
    pub analyze_dependencies: bool,
}

impl BulkRequest {
    pub fn new(
        resource_type: ResourceType,
        operation: BulkOperation,
        ids: Vec<ResourceId>,
    ) -> Self {
        Self {
            resource_type,
            operation,
            ids,
            analyze_dependencies: true,
        }
    }

    /// Skip analysis, acknowledging whatever the blast radius is.
    pub fn skip_analysis(mut self) -> Self {
        self.analyze_dependencies = false;
        self
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.ids.is_empty() {
            return Err(CoreError::Validation(
                "at least one id is required".to_string(),
            ));
        }
        if self.ids.len() > MAX_BULK_ITEMS {
            return Err(CoreError::Validation(format!(
                "at most {MAX_BULK_ITEMS} ids per bulk request, got {}",
                self.ids.len()
            )));
        }
        let mut seen = HashSet::with_capacity(self.ids.len());
        if let Some(dup) = self.ids.iter().find(|id| !seen.insert(**id)) {
            return Err(CoreError::Validation(format!("duplicate id {dup}")));
        }
        if let BulkOperation::Update(params) = &self.operation {
            if !params.as_object().is_some_and(|p| !p.is_empty()) {
                return Err(CoreError::Validation(
                    "update params must be a non-empty object".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Post-execution report.
#[derive(Debug, Clone, Serialize)]
pub struct BulkReport {
    pub run_id: Uuid,
    pub resource_type: ResourceType,
    pub action: BulkAction,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BulkItemResult>,
    pub summary: String,
    pub completed_at: Timestamp,
}

/// Result of [`BulkService::run`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BulkOutcome {
    /// Halted before any mutation; re-run with analysis skipped to proceed.
    ConfirmationRequired(PreflightReport),
    Completed(BulkReport),
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Analyse, gate and execute bulk mutations through one client.
pub struct BulkService<C> {
    analyzer: DependencyAnalyzer<C>,
    executor: BulkExecutor<C>,
    read_only: bool,
}

impl<C: ResourceClient + 'static> BulkService<C> {
    pub fn new(client: Arc<C>, config: &MediatorConfig) -> Self {
        Self {
            analyzer: DependencyAnalyzer::new(Arc::clone(&client))
                .with_concurrency(config.bulk.max_concurrency),
            executor: BulkExecutor::from_config(client, config),
            read_only: config.read_only,
        }
    }

    /// Dependency analysis and confirmation decision, without executing.
    pub async fn preflight(
        &self,
        request: &BulkRequest,
    ) -> Result<(DependencyAnalysis, PreflightReport), CoreError> {
        request.validate()?;
        let analysis = self
            .analyzer
            .analyze(request.resource_type, &request.ids)
            .await;
        let report = PreflightReport::from_analysis(&analysis, request.operation.action());
        Ok((analysis, report))
    }

    pub async fn run(&self, request: BulkRequest) -> Result<BulkOutcome, CoreError> {
        self.run_with_cancel(request, &CancellationToken::new()).await
    }

    /// Run `request`, dispatching no further items once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        request: BulkRequest,
        cancel: &CancellationToken,
    ) -> Result<BulkOutcome, CoreError> {
        request.validate()?;
        let action = request.operation.action();
        if self.read_only {
            return Err(CoreError::ReadOnly(format!(
                "refusing to {} {} {}",
                action.verb(),
                request.ids.len(),
                request.resource_type.noun(request.ids.len()),
            )));
        }

        let mut names = NameMap::new();
        if action.is_destructive() && request.analyze_dependencies {
            let (analysis, report) = self.preflight(&request).await?;
            if report.requires_confirmation {
                tracing::info!(
                    resource_type = %request.resource_type,
                    action = action.verb(),
                    total_impact = report.total_impact,
                    "Bulk operation halted pending confirmation",
                );
                return Ok(BulkOutcome::ConfirmationRequired(report));
            }
            names = analysis.name_map().clone();
        }

        let results = self
            .executor
            .execute_with_cancel(request.resource_type, &request.operation, &request.ids, cancel)
            .await;

        if action == BulkAction::Update {
            names.extend(updated_names(request.resource_type, &results));
        }

        let successful = results.iter().filter(|r| r.success).count();
        let summary = confirmation::summarize(request.resource_type, action, &results, &names);

        Ok(BulkOutcome::Completed(BulkReport {
            run_id: Uuid::new_v4(),
            resource_type: request.resource_type,
            action,
            successful,
            failed: results.len() - successful,
            results,
            summary,
            completed_at: Utc::now(),
        }))
    }
}

/// Names taken from the bodies returned by successful updates.
fn updated_names(
    resource_type: ResourceType,
    results: &[BulkItemResult],
) -> impl Iterator<Item = (ResourceId, String)> + '_ {
    results.iter().filter_map(move |r| {
        let name = display_name(resource_type, r.value.as_ref()?)?;
        Some((r.id, name))
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use km_client::mock::MockClient;
    use serde_json::json;

    use super::*;

    fn service(mock: MockClient) -> BulkService<MockClient> {
        BulkService::new(Arc::new(mock), &MediatorConfig::default())
    }

    #[tokio::test]
    async fn rejects_empty_and_oversized_requests() {
        let svc = service(MockClient::new());

        let empty = BulkRequest::new(ResourceType::Board, BulkOperation::Archive, vec![]);
        assert_matches!(svc.run(empty).await, Err(CoreError::Validation(_)));

        let ids = (1..=51).collect();
        let big = BulkRequest::new(ResourceType::Board, BulkOperation::Archive, ids);
        assert_matches!(svc.run(big).await, Err(CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_duplicate_ids() {
        let svc = service(MockClient::new());
        let req = BulkRequest::new(ResourceType::Card, BulkOperation::Archive, vec![1, 2, 1]);
        assert_matches!(
            svc.run(req).await,
            Err(CoreError::Validation(msg)) if msg == "duplicate id 1"
        );
    }

    #[tokio::test]
    async fn rejects_empty_update_params() {
        let svc = service(MockClient::new());
        let req = BulkRequest::new(ResourceType::Card, BulkOperation::Update(json!({})), vec![1]);
        assert_matches!(svc.run(req).await, Err(CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn read_only_refuses_before_any_call() {
        let mock = Arc::new(MockClient::new().with_named(ResourceType::Board, 1, "A"));
        let config = MediatorConfig {
            read_only: true,
            ..Default::default()
        };
        let svc = BulkService::new(Arc::clone(&mock), &config);

        let req = BulkRequest::new(ResourceType::Board, BulkOperation::delete(), vec![1]);
        assert_matches!(svc.run(req).await, Err(CoreError::ReadOnly(_)));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn update_summary_uses_returned_names() {
        let svc = service(MockClient::new().with_named(ResourceType::Card, 3, "Old"));
        let req = BulkRequest::new(
            ResourceType::Card,
            BulkOperation::Update(json!({"title": "New"})),
            vec![3],
        );

        let report = assert_matches!(svc.run(req).await, Ok(BulkOutcome::Completed(r)) => r);
        assert_eq!(report.summary, "Successfully updated 1 card:\n- New");
    }

    #[tokio::test]
    async fn outcome_json_is_tagged() {
        let svc = service(
            MockClient::new()
                .with_named(ResourceType::Board, 1, "Roadmap")
                .with_board_cards(1, 2),
        );
        let req = BulkRequest::new(ResourceType::Board, BulkOperation::delete(), vec![1]);

        let outcome = svc.run(req).await.unwrap();
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["status"], "confirmation_required");
        assert_eq!(json["requires_confirmation"], true);
        assert_eq!(json["total_impact"], 2);
        assert_eq!(json["resources_with_dependencies"], json!([1]));
    }
}
