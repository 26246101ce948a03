//! Integration tests for `CacheService`.
//!
//! Exercise the composed read path (lookup, single-flight fetch, store)
//! together with write invalidation and the stats surface.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use km_cache::{CacheKey, CacheService, CacheStats};
use km_core::config::CacheConfig;
use km_core::{ApiError, ResourceType};
use serde_json::{json, Value};

/// Remote stand-in that counts calls and answers after a short delay.
#[derive(Clone, Default)]
struct Remote {
    calls: Arc<AtomicUsize>,
}

impl Remote {
    fn fetch(&self, body: Value) -> impl std::future::Future<Output = Result<Value, ApiError>> {
        let calls = Arc::clone(&self.calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(body)
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn board_key(id: i64) -> CacheKey {
    CacheKey::for_id(ResourceType::Board, "get", id)
}

// ---------------------------------------------------------------------------
// Test: repeated reads within the TTL make one remote call
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_reads_hit_cache() {
    let service = CacheService::default();
    let remote = Remote::default();

    for _ in 0..4 {
        let value = service
            .get_or_fetch(board_key(1), || remote.fetch(json!({"name": "Roadmap"})))
            .await
            .unwrap();
        assert_eq!(value, json!({"name": "Roadmap"}));
    }

    assert_eq!(remote.calls(), 1);
    assert_eq!(
        service.stats(ResourceType::Board).await,
        CacheStats {
            hits: 3,
            misses: 1,
            size: 1,
            dedup_joins: 0
        }
    );
}

// ---------------------------------------------------------------------------
// Test: a cold burst of K identical reads costs one call, 1 miss, K-1 hits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_cold_reads_are_deduplicated() {
    let service = CacheService::default();
    let remote = Remote::default();

    let reads = (0..5).map(|_| {
        service.get_or_fetch(CacheKey::for_id(ResourceType::User, "get", 7), || {
            remote.fetch(json!({"username": "jdoe"}))
        })
    });
    let results = futures::future::join_all(reads).await;

    assert_eq!(remote.calls(), 1);
    assert!(results
        .iter()
        .all(|r| r.as_ref().unwrap() == &json!({"username": "jdoe"})));

    let stats = service.stats(ResourceType::User).await;
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 4);
    assert_eq!(stats.dedup_joins, 4);
    assert_eq!(stats.size, 1);
}

// ---------------------------------------------------------------------------
// Test: a write to a type makes the next read of its keys a miss
// ---------------------------------------------------------------------------

#[tokio::test]
async fn write_invalidation_forces_refetch() {
    let service = CacheService::default();
    let remote = Remote::default();

    service
        .get_or_fetch(board_key(1), || remote.fetch(json!("v1")))
        .await
        .unwrap();
    service
        .get_or_fetch(CacheKey::for_id(ResourceType::Card, "list_by_board", 1), || {
            remote.fetch(json!([]))
        })
        .await
        .unwrap();

    service.invalidate_after_write(ResourceType::Board).await;

    let again = service
        .get_or_fetch(board_key(1), || remote.fetch(json!("v2")))
        .await
        .unwrap();
    assert_eq!(again, json!("v2"));
    assert_eq!(service.stats(ResourceType::Board).await.misses, 2);
    // Board writes also drop card listings.
    assert_eq!(service.stats(ResourceType::Card).await.size, 0);
}

#[tokio::test]
async fn invalidation_leaves_other_types_alone() {
    let service = CacheService::default();
    let remote = Remote::default();

    service
        .get_or_fetch(CacheKey::for_id(ResourceType::User, "get", 1), || {
            remote.fetch(json!("u"))
        })
        .await
        .unwrap();

    service.invalidate_after_write(ResourceType::Card).await;

    assert_eq!(service.stats(ResourceType::User).await.size, 1);
}

// ---------------------------------------------------------------------------
// Test: a read that started before a write never stores its stale result
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slow_read_does_not_overwrite_after_invalidation() {
    let service = CacheService::default();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let slow_read = service.get_or_fetch(board_key(5), move || async move {
        let _ = release_rx.await;
        Ok(json!("stale"))
    });
    let writer = async {
        tokio::task::yield_now().await;
        service.invalidate_after_write(ResourceType::Board).await;
        let _ = release_tx.send(());
    };

    let (stale, ()) = tokio::join!(slow_read, writer);
    assert_eq!(stale.unwrap(), json!("stale"));

    assert!(service.get(&board_key(5)).await.is_none());
}

// ---------------------------------------------------------------------------
// Test: failures are shared but never cached
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_reads_are_not_cached() {
    let service = CacheService::default();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let calls = Arc::clone(&calls);
        let result = service
            .get_or_fetch(board_key(404), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::NotFound {
                    resource_type: ResourceType::Board,
                    id: 404,
                })
            })
            .await;
        assert_matches!(
            result,
            Err(ApiError::NotFound {
                resource_type: ResourceType::Board,
                id: 404,
            })
        );
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(service.stats(ResourceType::Board).await.size, 0);
}

// ---------------------------------------------------------------------------
// Test: a disabled cache is a no-op but still deduplicates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disabled_cache_always_fetches() {
    let service = CacheService::new(&CacheConfig::disabled());
    let remote = Remote::default();

    for _ in 0..3 {
        service
            .get_or_fetch(board_key(1), || remote.fetch(json!(1)))
            .await
            .unwrap();
    }
    assert_eq!(remote.calls(), 3);
    assert_eq!(service.stats(ResourceType::Board).await.misses, 3);

    let burst = (0..3).map(|_| service.get_or_fetch(board_key(2), || remote.fetch(json!(2))));
    futures::future::join_all(burst).await;
    assert_eq!(remote.calls(), 4);
}

// ---------------------------------------------------------------------------
// Test: TTL expiry turns the next read into a miss
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn expired_entries_are_refetched() {
    let service = CacheService::default();
    let remote = Remote::default();
    let key = CacheKey::for_id(ResourceType::Card, "get", 3);

    service.get_or_fetch(key.clone(), || remote.fetch(json!(1))).await.unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;
    service.get_or_fetch(key, || remote.fetch(json!(1))).await.unwrap();

    assert_eq!(remote.calls(), 2);
}

// ---------------------------------------------------------------------------
// Test: clear_all empties every type and resets counters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clear_all_resets_everything() {
    let service = CacheService::default();
    service.set(board_key(1), json!(1)).await;
    service
        .set(CacheKey::for_id(ResourceType::Workspace, "get", 1), json!(1))
        .await;
    assert!(service.get(&board_key(1)).await.is_some());

    service.clear_all().await;

    let all = service.all_stats().await;
    assert_eq!(all.len(), 5);
    assert!(all.values().all(|s| *s == CacheStats::default()));
}
