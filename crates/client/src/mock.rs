//! In-memory [`ResourceClient`] for tests.
//!
//! Holds resource bodies and child listings, records every call, and can
//! be scripted to fail specific calls (always, or a fixed number of times
//! before succeeding) or to answer after a delay.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use km_core::{ApiError, ResourceId, ResourceType};
use serde_json::{json, Value};

use crate::client::ResourceClient;

/// Which client method a call went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Get,
    ListBoardCards,
    ListWorkspaceBoards,
    ListCardChildren,
    ListCardComments,
    ListCardSubtasks,
    Update,
    Archive,
    Delete,
}

/// One recorded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockCall {
    pub op: MockOp,
    pub resource_type: ResourceType,
    pub id: ResourceId,
}

#[derive(Default)]
struct State {
    resources: HashMap<(ResourceType, ResourceId), Value>,
    children: HashMap<(MockOp, ResourceId), Vec<Value>>,
    /// Failures consumed one per call; an empty queue means success.
    scripted: HashMap<(MockOp, ResourceId), VecDeque<ApiError>>,
    /// Failures returned on every call.
    always: HashMap<(MockOp, ResourceId), ApiError>,
    delays: HashMap<(MockOp, ResourceId), Duration>,
    calls: Vec<MockCall>,
}

/// Scriptable in-memory client.
#[derive(Default)]
pub struct MockClient {
    state: Mutex<State>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state(&self, f: impl FnOnce(&mut State)) {
        let mut state = self.state.lock().expect("mock state poisoned");
        f(&mut state);
    }

    /// Register a resource body.
    pub fn with_resource(self, resource_type: ResourceType, id: ResourceId, body: Value) -> Self {
        self.with_state(|s| {
            s.resources.insert((resource_type, id), body);
        });
        self
    }

    /// Register a resource with the conventional name field for its type.
    pub fn with_named(self, resource_type: ResourceType, id: ResourceId, name: &str) -> Self {
        let field = match resource_type {
            ResourceType::Card => "title",
            ResourceType::User => "username",
            _ => "name",
        };
        self.with_resource(resource_type, id, json!({ "id": id, field: name }))
    }

    fn with_children(self, op: MockOp, parent: ResourceId, count: usize) -> Self {
        let items = (0..count).map(|i| json!({ "id": i + 1 })).collect();
        self.with_state(|s| {
            s.children.insert((op, parent), items);
        });
        self
    }

    pub fn with_board_cards(self, board_id: ResourceId, count: usize) -> Self {
        self.with_children(MockOp::ListBoardCards, board_id, count)
    }

    pub fn with_workspace_boards(self, workspace_id: ResourceId, count: usize) -> Self {
        self.with_children(MockOp::ListWorkspaceBoards, workspace_id, count)
    }

    pub fn with_card_children(self, card_id: ResourceId, count: usize) -> Self {
        self.with_children(MockOp::ListCardChildren, card_id, count)
    }

    pub fn with_card_comments(self, card_id: ResourceId, count: usize) -> Self {
        self.with_children(MockOp::ListCardComments, card_id, count)
    }

    pub fn with_card_subtasks(self, card_id: ResourceId, count: usize) -> Self {
        self.with_children(MockOp::ListCardSubtasks, card_id, count)
    }

    /// Make every `op` call for `id` fail with `err`.
    pub fn fail_always(self, op: MockOp, id: ResourceId, err: ApiError) -> Self {
        self.with_state(|s| {
            s.always.insert((op, id), err);
        });
        self
    }

    /// Make the next `times` `op` calls for `id` fail with `err`.
    pub fn fail_times(self, op: MockOp, id: ResourceId, err: ApiError, times: usize) -> Self {
        self.with_state(|s| {
            let queue = s.scripted.entry((op, id)).or_default();
            queue.extend(std::iter::repeat(err).take(times));
        });
        self
    }

    /// Delay every `op` call for `id` by `delay`.
    pub fn with_delay(self, op: MockOp, id: ResourceId, delay: Duration) -> Self {
        self.with_state(|s| {
            s.delays.insert((op, id), delay);
        });
        self
    }

    /// Every call recorded so far, in arrival order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().expect("mock state poisoned").calls.clone()
    }

    /// Number of `op` calls made for `id`.
    pub fn call_count(&self, op: MockOp, id: ResourceId) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.op == op && c.id == id)
            .count()
    }

    /// Number of `op` calls made for any id.
    pub fn op_count(&self, op: MockOp) -> usize {
        self.calls().iter().filter(|c| c.op == op).count()
    }

    pub fn contains(&self, resource_type: ResourceType, id: ResourceId) -> bool {
        self.state
            .lock()
            .expect("mock state poisoned")
            .resources
            .contains_key(&(resource_type, id))
    }

    /// Record the call and decide its scripted outcome.
    async fn enter(
        &self,
        op: MockOp,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> Result<(), ApiError> {
        let (delay, failure) = {
            let mut state = self.state.lock().expect("mock state poisoned");
            state.calls.push(MockCall {
                op,
                resource_type,
                id,
            });
            let failure = match state.always.get(&(op, id)) {
                Some(err) => Some(err.clone()),
                None => state
                    .scripted
                    .get_mut(&(op, id))
                    .and_then(VecDeque::pop_front),
            };
            (state.delays.get(&(op, id)).copied(), failure)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn list(&self, op: MockOp, parent: ResourceId) -> Vec<Value> {
        self.state
            .lock()
            .expect("mock state poisoned")
            .children
            .get(&(op, parent))
            .cloned()
            .unwrap_or_default()
    }
}

impl ResourceClient for MockClient {
    async fn get_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> Result<Value, ApiError> {
        self.enter(MockOp::Get, resource_type, id).await?;
        self.state
            .lock()
            .expect("mock state poisoned")
            .resources
            .get(&(resource_type, id))
            .cloned()
            .ok_or(ApiError::NotFound { resource_type, id })
    }

    async fn list_board_cards(&self, board_id: ResourceId) -> Result<Vec<Value>, ApiError> {
        self.enter(MockOp::ListBoardCards, ResourceType::Board, board_id)
            .await?;
        Ok(self.list(MockOp::ListBoardCards, board_id))
    }

    async fn list_workspace_boards(
        &self,
        workspace_id: ResourceId,
    ) -> Result<Vec<Value>, ApiError> {
        self.enter(MockOp::ListWorkspaceBoards, ResourceType::Workspace, workspace_id)
            .await?;
        Ok(self.list(MockOp::ListWorkspaceBoards, workspace_id))
    }

    async fn list_card_children(&self, card_id: ResourceId) -> Result<Vec<Value>, ApiError> {
        self.enter(MockOp::ListCardChildren, ResourceType::Card, card_id)
            .await?;
        Ok(self.list(MockOp::ListCardChildren, card_id))
    }

    async fn list_card_comments(&self, card_id: ResourceId) -> Result<Vec<Value>, ApiError> {
        self.enter(MockOp::ListCardComments, ResourceType::Card, card_id)
            .await?;
        Ok(self.list(MockOp::ListCardComments, card_id))
    }

    async fn list_card_subtasks(&self, card_id: ResourceId) -> Result<Vec<Value>, ApiError> {
        self.enter(MockOp::ListCardSubtasks, ResourceType::Card, card_id)
            .await?;
        Ok(self.list(MockOp::ListCardSubtasks, card_id))
    }

    async fn update_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
        params: &Value,
    ) -> Result<Value, ApiError> {
        self.enter(MockOp::Update, resource_type, id).await?;
        let mut state = self.state.lock().expect("mock state poisoned");
        let body = state
            .resources
            .get_mut(&(resource_type, id))
            .ok_or(ApiError::NotFound { resource_type, id })?;
        if let (Value::Object(target), Value::Object(patch)) = (&mut *body, params) {
            for (k, v) in patch {
                target.insert(k.clone(), v.clone());
            }
        }
        Ok(body.clone())
    }

    async fn archive_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> Result<(), ApiError> {
        self.enter(MockOp::Archive, resource_type, id).await?;
        let mut state = self.state.lock().expect("mock state poisoned");
        match state.resources.get_mut(&(resource_type, id)) {
            Some(Value::Object(body)) => {
                body.insert("is_archived".to_string(), json!(1));
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(ApiError::NotFound { resource_type, id }),
        }
    }

    async fn delete_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> Result<(), ApiError> {
        self.enter(MockOp::Delete, resource_type, id).await?;
        let mut state = self.state.lock().expect("mock state poisoned");
        state
            .resources
            .remove(&(resource_type, id))
            .map(|_| ())
            .ok_or(ApiError::NotFound { resource_type, id })
    }
}
