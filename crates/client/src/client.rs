//! The resource client contract.

use std::future::Future;

use km_core::{ApiError, ResourceId, ResourceType};
use serde_json::Value;

/// Per-resource reads and writes against the remote API.
///
/// Implementations only move data; caching, deduplication, timeouts and
/// retry policy are layered on top by [`CachedClient`](crate::CachedClient)
/// and the bulk executor.
pub trait ResourceClient: Send + Sync {
    /// Fetch a single resource body.
    fn get_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> impl Future<Output = Result<Value, ApiError>> + Send;

    /// Cards currently on a board.
    fn list_board_cards(
        &self,
        board_id: ResourceId,
    ) -> impl Future<Output = Result<Vec<Value>, ApiError>> + Send;

    /// Boards inside a workspace.
    fn list_workspace_boards(
        &self,
        workspace_id: ResourceId,
    ) -> impl Future<Output = Result<Vec<Value>, ApiError>> + Send;

    /// Child cards linked under a card.
    fn list_card_children(
        &self,
        card_id: ResourceId,
    ) -> impl Future<Output = Result<Vec<Value>, ApiError>> + Send;

    fn list_card_comments(
        &self,
        card_id: ResourceId,
    ) -> impl Future<Output = Result<Vec<Value>, ApiError>> + Send;

    fn list_card_subtasks(
        &self,
        card_id: ResourceId,
    ) -> impl Future<Output = Result<Vec<Value>, ApiError>> + Send;

    /// Apply `params` to a resource and return its updated body.
    fn update_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
        params: &Value,
    ) -> impl Future<Output = Result<Value, ApiError>> + Send;

    fn archive_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn delete_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}
