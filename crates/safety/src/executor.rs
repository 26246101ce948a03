//! Per-item execution of one mutation across many resources.
//!
//! Items move through `Pending -> Executing -> {Succeeded | Failed}` on
//! their own. One item's failure never stops or rolls back another. At
//! most `max_concurrency` items run at once, so under heavy rate limiting
//! a large batch degrades towards serial wall-clock time. Results always
//! come back in input order, one per id.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use km_client::ResourceClient;
use km_core::config::MediatorConfig;
use km_core::{ApiError, ResourceId, ResourceType};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::operation::BulkOperation;
use crate::retry::{Attempted, RetryPolicy};

/// Default number of items executing at once.
const DEFAULT_CONCURRENCY: usize = 5;

// ---------------------------------------------------------------------------
// Item results
// ---------------------------------------------------------------------------

/// Lifecycle of one bulk item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Executing,
    Succeeded,
    Failed,
}

impl ItemState {
    /// Whether the item has finished and will not change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Why a bulk item ended in [`ItemState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Not retried (not found, validation, forbidden, ...).
    Permanent,
    /// Retried until the attempt ceiling, still failing.
    TransientExhausted,
    /// Never dispatched because the run was cancelled.
    Cancelled,
}

/// Outcome for one input id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkItemResult {
    pub id: ResourceId,
    pub success: bool,
    pub state: ItemState,
    /// Updated body, present only for successful updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Remote attempts made, 0 when never dispatched.
    pub attempts: u32,
}

impl BulkItemResult {
    pub fn succeeded(id: ResourceId, value: Option<Value>, attempts: u32) -> Self {
        Self {
            id,
            success: true,
            state: ItemState::Succeeded,
            value,
            error: None,
            failure: None,
            attempts,
        }
    }

    pub fn failed(id: ResourceId, error: &ApiError, reason: FailureReason, attempts: u32) -> Self {
        Self::failed_with_message(id, error.to_string(), reason, attempts)
    }

    pub fn cancelled(id: ResourceId) -> Self {
        Self::failed_with_message(
            id,
            "Cancelled before dispatch".to_string(),
            FailureReason::Cancelled,
            0,
        )
    }

    fn failed_with_message(
        id: ResourceId,
        message: String,
        reason: FailureReason,
        attempts: u32,
    ) -> Self {
        Self {
            id,
            success: false,
            state: ItemState::Failed,
            value: None,
            error: Some(message),
            failure: Some(reason),
            attempts,
        }
    }
}

fn failure_reason<T>(attempted: &Attempted<T>) -> FailureReason {
    if attempted.exhausted() {
        FailureReason::TransientExhausted
    } else {
        FailureReason::Permanent
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Applies a [`BulkOperation`] to a batch of ids.
pub struct BulkExecutor<C> {
    client: Arc<C>,
    retry: RetryPolicy,
    max_concurrency: usize,
}

impl<C: ResourceClient + 'static> BulkExecutor<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            max_concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn from_config(client: Arc<C>, config: &MediatorConfig) -> Self {
        Self::new(client)
            .with_retry(RetryPolicy::new(config.retry.clone()))
            .with_concurrency(config.bulk.max_concurrency)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Limit how many items execute at once (minimum 1).
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Run `operation` on every id and return one result per id, in order.
    pub async fn execute(
        &self,
        resource_type: ResourceType,
        operation: &BulkOperation,
        ids: &[ResourceId],
    ) -> Vec<BulkItemResult> {
        self.execute_with_cancel(resource_type, operation, ids, &CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), but stops dispatching once `cancel`
    /// fires. Items already executing run to completion; the rest are
    /// reported as [`FailureReason::Cancelled`].
    pub async fn execute_with_cancel(
        &self,
        resource_type: ResourceType,
        operation: &BulkOperation,
        ids: &[ResourceId],
        cancel: &CancellationToken,
    ) -> Vec<BulkItemResult> {
        tracing::info!(
            resource_type = %resource_type,
            action = operation.action().verb(),
            items = ids.len(),
            max_concurrency = self.max_concurrency,
            "Bulk execution started",
        );

        for id in ids {
            tracing::debug!(id, state = ?ItemState::Pending, "Bulk item queued");
        }

        let items = stream::iter(ids.iter().copied().enumerate());
        let mut indexed: Vec<(usize, BulkItemResult)> = items
            .map(|(index, id)| {
                let client = Arc::clone(&self.client);
                let retry = self.retry.clone();
                let operation = operation.clone();
                async move {
                    if cancel.is_cancelled() {
                        tracing::debug!(id, "Bulk item skipped, run cancelled");
                        return (index, BulkItemResult::cancelled(id));
                    }
                    tracing::debug!(id, state = ?ItemState::Executing, "Bulk item dispatched");
                    // Spawned so a dispatched item finishes even if this run
                    // is dropped.
                    let task = tokio::spawn(run_item(client, retry, resource_type, operation, id));
                    let result = match task.await {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::error!(id, error = %e, "Bulk item task failed");
                            BulkItemResult::failed_with_message(
                                id,
                                format!("Internal error: {e}"),
                                FailureReason::Permanent,
                                0,
                            )
                        }
                    };
                    (index, result)
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        indexed.sort_by_key(|(index, _)| *index);
        let results: Vec<BulkItemResult> = indexed.into_iter().map(|(_, r)| r).collect();
        debug_assert!(results.iter().all(|r| r.state.is_terminal()));

        let successful = results.iter().filter(|r| r.success).count();
        tracing::info!(
            resource_type = %resource_type,
            action = operation.action().verb(),
            successful,
            failed = results.len() - successful,
            "Bulk execution finished",
        );
        results
    }
}

/// Execute one item, retrying transient failures.
async fn run_item<C: ResourceClient>(
    client: Arc<C>,
    retry: RetryPolicy,
    resource_type: ResourceType,
    operation: BulkOperation,
    id: ResourceId,
) -> BulkItemResult {
    let label = format!("{resource_type} {id}");
    let client = client.as_ref();

    let result = match &operation {
        BulkOperation::Delete { archive_first } => {
            if *archive_first && resource_type == ResourceType::Card {
                archive_then_delete(client, &retry, &label, id).await
            } else {
                let deleted = retry
                    .run(&label, move || client.delete_resource(resource_type, id))
                    .await;
                unit_result(id, deleted)
            }
        }
        BulkOperation::Archive => {
            let archived = retry
                .run(&label, move || client.archive_resource(resource_type, id))
                .await;
            unit_result(id, archived)
        }
        BulkOperation::Update(params) => {
            let updated = retry
                .run(&label, move || client.update_resource(resource_type, id, params))
                .await;
            let reason = failure_reason(&updated);
            match updated.result {
                Ok(body) => BulkItemResult::succeeded(id, Some(body), updated.attempts),
                Err(e) => BulkItemResult::failed(id, &e, reason, updated.attempts),
            }
        }
    };

    if let Some(error) = &result.error {
        tracing::warn!(
            resource_type = %resource_type,
            id,
            attempts = result.attempts,
            failure = ?result.failure,
            error = %error,
            "Bulk item failed",
        );
    } else {
        tracing::debug!(
            resource_type = %resource_type,
            id,
            attempts = result.attempts,
            "Bulk item succeeded"
        );
    }
    result
}

/// Cards still in use must be archived before they can be deleted. Both
/// steps belong to the same item; a failed archive skips the delete.
async fn archive_then_delete<C: ResourceClient>(
    client: &C,
    retry: &RetryPolicy,
    label: &str,
    id: ResourceId,
) -> BulkItemResult {
    let archived = retry
        .run(label, move || client.archive_resource(ResourceType::Card, id))
        .await;
    if let Err(e) = &archived.result {
        return BulkItemResult::failed(id, e, failure_reason(&archived), archived.attempts);
    }

    let deleted = retry
        .run(label, move || client.delete_resource(ResourceType::Card, id))
        .await;
    let attempts = archived.attempts + deleted.attempts;
    let reason = failure_reason(&deleted);
    match deleted.result {
        Ok(()) => BulkItemResult::succeeded(id, None, attempts),
        Err(e) => BulkItemResult::failed_with_message(
            id,
            format!("Archived, but delete failed: {e}"),
            reason,
            attempts,
        ),
    }
}

fn unit_result(id: ResourceId, attempted: Attempted<()>) -> BulkItemResult {
    let reason = failure_reason(&attempted);
    match attempted.result {
        Ok(()) => BulkItemResult::succeeded(id, None, attempted.attempts),
        Err(e) => BulkItemResult::failed(id, &e, reason, attempted.attempts),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use km_client::mock::{MockClient, MockOp};
    use km_core::config::RetryConfig;
    use serde_json::json;

    use super::*;

    fn boards(ids: &[ResourceId]) -> MockClient {
        ids.iter().fold(MockClient::new(), |mock, id| {
            mock.with_named(ResourceType::Board, *id, &format!("Board {id}"))
        })
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            multiplier: 2.0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_input_order() {
        let ids = [10, 20, 30, 40, 50];
        let mock = boards(&ids)
            .with_delay(MockOp::Delete, 10, Duration::from_millis(50))
            .with_delay(MockOp::Delete, 30, Duration::from_millis(20));
        let executor = BulkExecutor::new(Arc::new(mock));

        let results = executor
            .execute(ResourceType::Board, &BulkOperation::delete(), &ids)
            .await;

        let order: Vec<ResourceId> = results.iter().map(|r| r.id).collect();
        assert_eq!(order, ids);
        assert!(results.iter().all(|r| r.success && r.state == ItemState::Succeeded));
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_does_not_stop_the_rest() {
        let mock = boards(&[1, 3]);
        let executor = BulkExecutor::new(Arc::new(mock));

        let results = executor
            .execute(ResourceType::Board, &BulkOperation::Archive, &[1, 2, 3])
            .await;

        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[1].failure, Some(FailureReason::Permanent));
        assert_eq!(results[1].error.as_deref(), Some("Board 2 not found"));
        assert!(results[2].success);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let mock = Arc::new(boards(&[1]).fail_times(
            MockOp::Delete,
            1,
            ApiError::RateLimited { retry_after: None },
            2,
        ));
        let executor = BulkExecutor::new(Arc::clone(&mock)).with_retry(fast_retry());

        let results = executor
            .execute(ResourceType::Board, &BulkOperation::delete(), &[1])
            .await;

        assert!(results[0].success);
        assert_eq!(results[0].attempts, 3);
        assert_eq!(mock.call_count(MockOp::Delete, 1), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_the_item() {
        let mock = Arc::new(boards(&[1]).fail_always(
            MockOp::Delete,
            1,
            ApiError::Server {
                status: 502,
                message: "bad gateway".into(),
            },
        ));
        let executor = BulkExecutor::new(Arc::clone(&mock)).with_retry(fast_retry());

        let results = executor
            .execute(ResourceType::Board, &BulkOperation::delete(), &[1])
            .await;

        assert_eq!(results[0].failure, Some(FailureReason::TransientExhausted));
        assert_eq!(mock.call_count(MockOp::Delete, 1), 3);
    }

    #[tokio::test]
    async fn update_returns_body() {
        let mock = boards(&[1]);
        let executor = BulkExecutor::new(Arc::new(mock));

        let results = executor
            .execute(
                ResourceType::Board,
                &BulkOperation::Update(json!({"description": "moved"})),
                &[1],
            )
            .await;

        let body = results[0].value.as_ref().unwrap();
        assert_eq!(body["description"], "moved");
        assert_eq!(body["name"], "Board 1");
    }

    #[tokio::test]
    async fn card_delete_archives_first() {
        let mock = Arc::new(MockClient::new().with_named(ResourceType::Card, 7, "Bug"));
        let executor = BulkExecutor::new(Arc::clone(&mock));

        let results = executor
            .execute(ResourceType::Card, &BulkOperation::delete(), &[7])
            .await;

        assert!(results[0].success);
        let ops: Vec<MockOp> = mock.calls().iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![MockOp::Archive, MockOp::Delete]);
    }

    #[tokio::test]
    async fn failed_archive_skips_delete() {
        let mock = Arc::new(MockClient::new().with_named(ResourceType::Card, 7, "Bug").fail_always(
            MockOp::Archive,
            7,
            ApiError::Forbidden("locked".into()),
        ));
        let executor = BulkExecutor::new(Arc::clone(&mock));

        let results = executor
            .execute(ResourceType::Card, &BulkOperation::delete(), &[7])
            .await;

        assert_matches!(results[0].failure, Some(FailureReason::Permanent));
        assert_eq!(mock.op_count(MockOp::Delete), 0);
    }

    #[tokio::test]
    async fn card_delete_without_archive() {
        let mock = Arc::new(MockClient::new().with_named(ResourceType::Card, 7, "Bug"));
        let executor = BulkExecutor::new(Arc::clone(&mock));

        executor
            .execute(
                ResourceType::Card,
                &BulkOperation::Delete {
                    archive_first: false,
                },
                &[7],
            )
            .await;

        assert_eq!(mock.op_count(MockOp::Archive), 0);
        assert_eq!(mock.op_count(MockOp::Delete), 1);
    }

    #[tokio::test]
    async fn cancelled_run_dispatches_nothing() {
        let mock = Arc::new(boards(&[1, 2, 3]));
        let executor = BulkExecutor::new(Arc::clone(&mock));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = executor
            .execute_with_cancel(
                ResourceType::Board,
                &BulkOperation::delete(),
                &[1, 2, 3],
                &cancel,
            )
            .await;

        assert!(results
            .iter()
            .all(|r| r.failure == Some(FailureReason::Cancelled) && r.attempts == 0));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_run_finishes_inflight_and_skips_queued() {
        let mock = Arc::new(
            boards(&[1, 2, 3]).with_delay(MockOp::Delete, 1, Duration::from_millis(50)),
        );
        let executor = BulkExecutor::new(Arc::clone(&mock)).with_concurrency(1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let op = BulkOperation::delete();

        let (results, ()) = tokio::join!(
            executor.execute_with_cancel(
                ResourceType::Board,
                &op,
                &[1, 2, 3],
                &cancel,
            ),
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                trigger.cancel();
            },
        );

        let outcome: Vec<(ResourceId, bool, Option<FailureReason>)> = results
            .iter()
            .map(|r| (r.id, r.success, r.failure))
            .collect();
        assert_eq!(
            outcome,
            vec![
                (1, true, None),
                (2, false, Some(FailureReason::Cancelled)),
                (3, false, Some(FailureReason::Cancelled)),
            ]
        );
        assert_eq!(mock.op_count(MockOp::Delete), 1);
        assert!(results.iter().all(|r| r.state.is_terminal()));
    }

    #[test]
    fn only_finished_states_are_terminal() {
        assert!(!ItemState::Pending.is_terminal());
        assert!(!ItemState::Executing.is_terminal());
        assert!(ItemState::Succeeded.is_terminal());
        assert!(ItemState::Failed.is_terminal());
    }

    #[test]
    fn item_result_json_skips_empty_fields() {
        let json = serde_json::to_value(BulkItemResult::succeeded(4, None, 1)).unwrap();
        assert_eq!(
            json,
            json!({"id": 4, "success": true, "state": "succeeded", "attempts": 1})
        );
    }
}
