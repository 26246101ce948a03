//! Time-boxed response cache for a single resource type.
//!
//! Expiry is lazy: stale entries are dropped when a read finds them and are
//! never counted by [`TtlCache::len`]. A zero TTL turns every `set`
//! into a no-op, so a disabled cache needs no special casing upstream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use km_core::ResourceType;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::key::CacheKey;

/// A cached read result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub stored_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Bumped on every invalidation. Reads that started under an older
    /// generation may not store their result.
    generation: u64,
}

/// Cache for one [`ResourceType`].
pub struct TtlCache {
    resource_type: ResourceType,
    ttl: Duration,
    inner: RwLock<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TtlCache {
    pub fn new(resource_type: ResourceType, ttl: Duration) -> Self {
        Self {
            resource_type,
            ttl,
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                generation: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Configured time-to-live for entries stored via [`set_default`](Self::set_default).
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Read a value, counting the outcome as a hit or a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        let found = self.lookup(key).await;
        if found.is_some() {
            self.record_hit();
        } else {
            self.record_miss();
        }
        found
    }

    /// Read a value without touching the counters.
    ///
    /// An expired entry is removed and reported as absent.
    pub async fn lookup(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        {
            let inner = self.inner.read().await;
            match inner.entries.get(key) {
                None => return None,
                Some(entry) if entry.is_fresh(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        let mut inner = self.inner.write().await;
        // Re-check under the write lock; a concurrent set may have refreshed it.
        match inner.entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `value` for `ttl`. A zero `ttl` stores nothing.
    pub async fn set(&self, key: CacheKey, value: Value, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        self.inner.write().await.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
                expires_at: now + ttl,
            },
        );
    }

    /// Store `value` using the configured TTL.
    pub async fn set_default(&self, key: CacheKey, value: Value) {
        self.set(key, value, self.ttl).await;
    }

    /// Store `value` only if no invalidation happened since `generation`
    /// was observed. Returns whether the value was stored.
    pub async fn set_if_current(&self, key: CacheKey, value: Value, generation: u64) -> bool {
        if self.ttl.is_zero() {
            return false;
        }
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        if inner.generation != generation {
            tracing::debug!(
                resource_type = %self.resource_type,
                key = %key,
                "Discarding read result that predates an invalidation",
            );
            return false;
        }
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
                expires_at: now + self.ttl,
            },
        );
        true
    }

    /// Current invalidation generation.
    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }

    /// Drop every entry and start a new generation. Returns how many
    /// entries were removed.
    pub async fn invalidate(&self) -> usize {
        let mut inner = self.inner.write().await;
        let removed = inner.entries.len();
        inner.entries.clear();
        inner.generation += 1;
        removed
    }

    /// Remove expired entries eagerly. Returns how many were removed.
    #[cfg(test)]
    pub(crate) async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_fresh(now));
        before - inner.entries.len()
    }

    /// Number of unexpired entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .read()
            .await
            .entries
            .values()
            .filter(|entry| entry.is_fresh(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset hit/miss counters, keeping the entries.
    pub(crate) fn reset_counters(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
