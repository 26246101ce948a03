//! Per-resource-type cache service.
//!
//! [`CacheService`] owns one [`TtlCache`] and one [`RequestDeduplicator`]
//! per [`ResourceType`]. It is created once per client session and handed
//! to whatever needs cached reads; nothing outside this module mutates
//! cache entries.
//!
//! The composed read path is `lookup → on miss → dedupe(producer) → store`.
//! The store happens inside the shared call, before the in-flight
//! registration is dropped, so a burst of identical reads against a cold
//! cache costs exactly one remote call: one miss, the rest counted as hits.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use km_core::config::CacheConfig;
use km_core::{ApiError, ResourceType};
use serde::Serialize;
use serde_json::Value;

use crate::dedup::{RequestDeduplicator, Role};
use crate::key::CacheKey;
use crate::ttl::TtlCache;

/// Counters reported for one resource type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Unexpired entries currently held.
    pub size: usize,
    /// Hits that were served by joining an in-flight read.
    pub dedup_joins: u64,
}

impl CacheStats {
    /// Fraction of reads served without a remote call, `0.0` when idle.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Scope {
    cache: Arc<TtlCache>,
    dedup: RequestDeduplicator,
}

/// Cache and deduplicator state for every resource type.
pub struct CacheService {
    scopes: [Scope; ResourceType::ALL.len()],
}

fn slot(resource_type: ResourceType) -> usize {
    match resource_type {
        ResourceType::Workspace => 0,
        ResourceType::Board => 1,
        ResourceType::Card => 2,
        ResourceType::CustomField => 3,
        ResourceType::User => 4,
    }
}

impl CacheService {
    pub fn new(config: &CacheConfig) -> Self {
        let scopes = ResourceType::ALL.map(|t| Scope {
            cache: Arc::new(TtlCache::new(t, config.ttl_for(t))),
            dedup: RequestDeduplicator::new(),
        });
        tracing::debug!(enabled = config.enabled, "Cache service created");
        Self { scopes }
    }

    /// A service that never stores anything but still deduplicates.
    pub fn disabled() -> Self {
        Self::new(&CacheConfig::disabled())
    }

    fn scope(&self, resource_type: ResourceType) -> &Scope {
        &self.scopes[slot(resource_type)]
    }

    /// The cache for one resource type.
    pub fn cache(&self, resource_type: ResourceType) -> &TtlCache {
        &self.scope(resource_type).cache
    }

    /// Plain counted lookup.
    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        self.cache(key.resource_type()).get(key).await
    }

    /// Store a value with the type's configured TTL.
    pub async fn set(&self, key: CacheKey, value: Value) {
        self.cache(key.resource_type()).set_default(key, value).await;
    }

    /// Serve `key` from cache, or fetch it once via `producer` and store it.
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, producer: F) -> Result<Value, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        let scope = self.scope(key.resource_type());

        if let Some(value) = scope.cache.lookup(&key).await {
            scope.cache.record_hit();
            tracing::debug!(key = %key, "Cache hit");
            return Ok(value);
        }

        let generation = scope.cache.generation().await;
        let cache = Arc::clone(&scope.cache);
        let store_key = key.clone();

        let (role, result) = scope
            .dedup
            .dedupe_with_role(key.clone(), move || {
                let call = producer();
                async move {
                    let result = call.await;
                    if let Ok(value) = &result {
                        cache.set_if_current(store_key, value.clone(), generation).await;
                    }
                    result
                }
            })
            .await;

        match role {
            Role::Leader => {
                scope.cache.record_miss();
                tracing::debug!(key = %key, ok = result.is_ok(), "Cache miss, fetched");
            }
            Role::Waiter => {
                scope.cache.record_hit();
                tracing::debug!(key = %key, "Served by in-flight read");
            }
        }

        result
    }

    /// Drop every cached entry and pending registration for one type.
    pub async fn invalidate(&self, resource_type: ResourceType) -> usize {
        let scope = self.scope(resource_type);
        let removed = scope.cache.invalidate().await;
        scope.dedup.forget_all().await;
        tracing::debug!(resource_type = %resource_type, removed, "Cache invalidated");
        removed
    }

    /// Invalidate everything a successful write to `resource_type` makes
    /// stale (see [`ResourceType::invalidates`]).
    pub async fn invalidate_after_write(&self, resource_type: ResourceType) {
        for t in resource_type.invalidates() {
            self.invalidate(*t).await;
        }
    }

    /// Drop every entry of every type and reset the counters.
    pub async fn clear_all(&self) {
        for scope in &self.scopes {
            scope.cache.invalidate().await;
            scope.dedup.forget_all().await;
            scope.cache.reset_counters();
            scope.dedup.reset_counters();
        }
        tracing::info!("All caches cleared");
    }

    pub async fn stats(&self, resource_type: ResourceType) -> CacheStats {
        let scope = self.scope(resource_type);
        CacheStats {
            hits: scope.cache.hits(),
            misses: scope.cache.misses(),
            size: scope.cache.len().await,
            dedup_joins: scope.dedup.joins(),
        }
    }

    pub async fn all_stats(&self) -> BTreeMap<ResourceType, CacheStats> {
        let mut all = BTreeMap::new();
        for t in ResourceType::ALL {
            all.insert(t, self.stats(t).await);
        }
        all
    }
}

impl Default for CacheService {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
