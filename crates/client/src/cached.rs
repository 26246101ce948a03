//! Cache-aware wrapper around any [`ResourceClient`].
//!
//! Reads go through the shared [`CacheService`] (lookup, single-flight
//! fetch, store). Writes are never cached or deduplicated: each one runs
//! exactly once, and a successful write invalidates the affected cache
//! namespaces. Every remote call is bounded by a per-call timeout whose
//! expiry surfaces as the transient [`ApiError::Timeout`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use km_cache::{CacheKey, CacheService};
use km_core::config::MediatorConfig;
use km_core::{ApiError, ResourceId, ResourceType};
use serde_json::{json, Value};

use crate::client::ResourceClient;

/// Default per-call timeout when none is configured.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A [`ResourceClient`] with caching, deduplication and timeouts.
pub struct CachedClient<C> {
    inner: Arc<C>,
    cache: Arc<CacheService>,
    call_timeout: Duration,
    read_only: bool,
}

impl<C> CachedClient<C>
where
    C: ResourceClient + 'static,
{
    pub fn new(inner: C, cache: Arc<CacheService>) -> Self {
        Self {
            inner: Arc::new(inner),
            cache,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            read_only: false,
        }
    }

    /// Build from session configuration (timeout and read-only flag).
    pub fn from_config(inner: C, cache: Arc<CacheService>, config: &MediatorConfig) -> Self {
        Self::new(inner, cache)
            .with_call_timeout(config.bulk.call_timeout)
            .with_read_only(config.read_only)
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    // ---- private helpers ----

    async fn cached_read<F, Fut>(&self, key: CacheKey, call: F) -> Result<Value, ApiError>
    where
        F: FnOnce(Arc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let limit = self.call_timeout;
        self.cache
            .get_or_fetch(key, move || async move { with_timeout(limit, call(inner)).await })
            .await
    }

    async fn cached_list<F, Fut>(&self, key: CacheKey, call: F) -> Result<Vec<Value>, ApiError>
    where
        F: FnOnce(Arc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<Value>, ApiError>> + Send + 'static,
    {
        let body = self
            .cached_read(key, move |inner| async move { call(inner).await.map(Value::Array) })
            .await?;
        match body {
            Value::Array(items) => Ok(items),
            other => Err(ApiError::Decode(format!("expected a list, got {other}"))),
        }
    }

    fn ensure_writable(
        &self,
        action: &str,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> Result<(), ApiError> {
        if self.read_only {
            tracing::warn!(
                resource_type = %resource_type,
                id,
                action,
                "Write refused in read-only mode"
            );
            return Err(ApiError::ReadOnly(format!(
                "cannot {action} {} {id}",
                resource_type.noun(1)
            )));
        }
        Ok(())
    }

    async fn after_write(&self, resource_type: ResourceType) {
        self.cache.invalidate_after_write(resource_type).await;
    }
}

impl<C> ResourceClient for CachedClient<C>
where
    C: ResourceClient + 'static,
{
    async fn get_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> Result<Value, ApiError> {
        self.cached_read(CacheKey::for_id(resource_type, "get", id), move |inner| async move {
            inner.get_resource(resource_type, id).await
        })
        .await
    }

    async fn list_board_cards(&self, board_id: ResourceId) -> Result<Vec<Value>, ApiError> {
        let key = CacheKey::new(
            ResourceType::Card,
            "list_by_board",
            &json!({ "board_id": board_id }),
        );
        self.cached_list(key, move |inner| async move {
            inner.list_board_cards(board_id).await
        })
        .await
    }

    async fn list_workspace_boards(
        &self,
        workspace_id: ResourceId,
    ) -> Result<Vec<Value>, ApiError> {
        let key = CacheKey::new(
            ResourceType::Board,
            "list_by_workspace",
            &json!({ "workspace_id": workspace_id }),
        );
        self.cached_list(key, move |inner| async move {
            inner.list_workspace_boards(workspace_id).await
        })
        .await
    }

    async fn list_card_children(&self, card_id: ResourceId) -> Result<Vec<Value>, ApiError> {
        let key = CacheKey::new(
            ResourceType::Card,
            "list_children",
            &json!({ "card_id": card_id }),
        );
        self.cached_list(key, move |inner| async move {
            inner.list_card_children(card_id).await
        })
        .await
    }

    async fn list_card_comments(&self, card_id: ResourceId) -> Result<Vec<Value>, ApiError> {
        let key = CacheKey::new(
            ResourceType::Card,
            "list_comments",
            &json!({ "card_id": card_id }),
        );
        self.cached_list(key, move |inner| async move {
            inner.list_card_comments(card_id).await
        })
        .await
    }

    async fn list_card_subtasks(&self, card_id: ResourceId) -> Result<Vec<Value>, ApiError> {
        let key = CacheKey::new(
            ResourceType::Card,
            "list_subtasks",
            &json!({ "card_id": card_id }),
        );
        self.cached_list(key, move |inner| async move {
            inner.list_card_subtasks(card_id).await
        })
        .await
    }

    async fn update_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
        params: &Value,
    ) -> Result<Value, ApiError> {
        self.ensure_writable("update", resource_type, id)?;
        let updated = with_timeout(
            self.call_timeout,
            self.inner.update_resource(resource_type, id, params),
        )
        .await?;
        self.after_write(resource_type).await;
        Ok(updated)
    }

    async fn archive_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> Result<(), ApiError> {
        self.ensure_writable("archive", resource_type, id)?;
        with_timeout(self.call_timeout, self.inner.archive_resource(resource_type, id)).await?;
        self.after_write(resource_type).await;
        Ok(())
    }

    async fn delete_resource(
        &self,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> Result<(), ApiError> {
        self.ensure_writable("delete", resource_type, id)?;
        with_timeout(self.call_timeout, self.inner.delete_resource(resource_type, id)).await?;
        self.after_write(resource_type).await;
        Ok(())
    }
}

/// Bound `call` by `limit`, mapping expiry to [`ApiError::Timeout`].
async fn with_timeout<T, Fut>(limit: Duration, call: Fut) -> Result<T, ApiError>
where
    Fut: Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "Remote call timed out");
            Err(ApiError::Timeout(limit))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
