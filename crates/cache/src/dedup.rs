//! Single-flight deduplication of in-flight reads.
//!
//! The first caller for a [`CacheKey`] becomes the leader: its producer is
//! started once and wrapped in a [`Shared`] future. Callers arriving while
//! it is pending join as waiters and await the same future, so every one
//! of them observes the same value or the same [`ApiError`].
//!
//! The registration removes itself the moment the producer settles, from
//! inside the shared future. Dropping any single caller (including the
//! leader) does not cancel the call for the others; the remaining waiters
//! keep driving it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use km_core::ApiError;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::key::CacheKey;

type SharedRead = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

/// How a caller took part in a deduplicated read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Started the underlying call.
    Leader,
    /// Attached to a call that was already in flight.
    Waiter,
}

struct InFlight {
    /// Distinguishes this registration from a later one under the same key.
    token: u64,
    future: SharedRead,
    waiters: usize,
}

type Registry = Arc<Mutex<HashMap<CacheKey, InFlight>>>;

/// Collapses concurrent identical reads into one underlying call.
pub struct RequestDeduplicator {
    in_flight: Registry,
    next_token: AtomicU64,
    joins: AtomicU64,
}

impl RequestDeduplicator {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
            joins: AtomicU64::new(0),
        }
    }

    /// Run `producer` for `key` unless an identical call is already pending.
    pub async fn dedupe<F, Fut>(&self, key: CacheKey, producer: F) -> Result<Value, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        let (_, result) = self.dedupe_with_role(key, producer).await;
        result
    }

    /// Like [`dedupe`](Self::dedupe), also reporting whether this caller
    /// led the call or joined it.
    ///
    /// `producer` is only invoked by the leader, while the registry lock is
    /// held; it should just build the future, not do work.
    pub async fn dedupe_with_role<F, Fut>(
        &self,
        key: CacheKey,
        producer: F,
    ) -> (Role, Result<Value, ApiError>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
    {
        let (role, shared) = {
            let mut registry = self.in_flight.lock().await;
            match registry.get_mut(&key) {
                Some(pending) => {
                    pending.waiters += 1;
                    self.joins.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        key = %key,
                        waiters = pending.waiters,
                        "Joined in-flight read",
                    );
                    (Role::Waiter, pending.future.clone())
                }
                None => {
                    let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                    let shared = settle_and_unregister(
                        Arc::clone(&self.in_flight),
                        key.clone(),
                        token,
                        producer(),
                    );
                    registry.insert(
                        key,
                        InFlight {
                            token,
                            future: shared.clone(),
                            waiters: 1,
                        },
                    );
                    (Role::Leader, shared)
                }
            }
        };

        (role, shared.await)
    }

    /// Number of distinct reads currently pending.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Callers (leader included) attached to the pending read for `key`.
    #[cfg(test)]
    pub(crate) async fn waiters(&self, key: &CacheKey) -> usize {
        self.in_flight
            .lock()
            .await
            .get(key)
            .map_or(0, |pending| pending.waiters)
    }

    /// Total callers that joined an existing read instead of starting one.
    pub fn joins(&self) -> u64 {
        self.joins.load(Ordering::Relaxed)
    }

    /// Forget every pending registration.
    ///
    /// Callers already attached still receive their result; callers that
    /// arrive afterwards start a fresh read.
    pub async fn forget_all(&self) -> usize {
        let mut registry = self.in_flight.lock().await;
        let dropped = registry.len();
        registry.clear();
        dropped
    }

    pub(crate) fn reset_counters(&self) {
        self.joins.store(0, Ordering::Relaxed);
    }
}

impl Default for RequestDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap `call` so that it removes its own registration once settled.
fn settle_and_unregister<Fut>(
    registry: Registry,
    key: CacheKey,
    token: u64,
    call: Fut,
) -> SharedRead
where
    Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
{
    async move {
        let result = call.await;
        let mut registry = registry.lock().await;
        if registry.get(&key).is_some_and(|pending| pending.token == token) {
            registry.remove(&key);
        }
        result
    }
    .boxed()
    .shared()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use km_core::ResourceType;
    use serde_json::json;

    use super::*;

    fn key() -> CacheKey {
        CacheKey::for_id(ResourceType::Card, "get", 9)
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_call() {
        let dedup = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let read = || {
            let calls = Arc::clone(&calls);
            dedup.dedupe_with_role(key(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!({"title": "shared"}))
            })
        };

        let results = futures::future::join_all((0..5).map(|_| read())).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            results.iter().filter(|(role, _)| *role == Role::Leader).count(),
            1
        );
        for (_, result) in &results {
            assert_eq!(result.as_ref().unwrap(), &json!({"title": "shared"}));
        }
        assert_eq!(dedup.joins(), 4);
        assert_eq!(dedup.in_flight().await, 0);
    }

    #[tokio::test]
    async fn failure_is_shared_and_not_remembered() {
        let dedup = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let failing = || {
            let calls = Arc::clone(&calls);
            dedup.dedupe(key(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(ApiError::Server {
                    status: 503,
                    message: "down".into(),
                })
            })
        };

        let (a, b) = tokio::join!(failing(), failing());
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Settled, so the next read starts a new call.
        let _ = failing().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sequential_reads_are_not_deduplicated() {
        let dedup = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let (role, _) = dedup
                .dedupe_with_role(key(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!(null))
                })
                .await;
            assert_eq!(role, Role::Leader);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn dropped_leader_does_not_cancel_waiter() {
        let dedup = Arc::new(RequestDeduplicator::new());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let leader = {
            let dedup = Arc::clone(&dedup);
            tokio::spawn(async move {
                dedup
                    .dedupe(key(), move || async move {
                        let _ = release_rx.await;
                        Ok(json!("done"))
                    })
                    .await
            })
        };

        while dedup.in_flight().await == 0 {
            tokio::task::yield_now().await;
        }

        let waiter = {
            let dedup = Arc::clone(&dedup);
            tokio::spawn(async move {
                dedup
                    .dedupe(key(), || async { Ok(json!("should not run")) })
                    .await
            })
        };

        while dedup.waiters(&key()).await < 2 {
            tokio::task::yield_now().await;
        }

        leader.abort();
        let _ = release_tx.send(());

        assert_eq!(waiter.await.unwrap().unwrap(), json!("done"));
    }

    #[tokio::test]
    async fn forget_all_lets_new_callers_start_fresh() {
        let dedup = RequestDeduplicator::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let first = dedup.dedupe(key(), move || async move {
            let _ = rx.await;
            Ok(json!("old"))
        });
        let second = async {
            while dedup.in_flight().await == 0 {
                tokio::task::yield_now().await;
            }
            assert_eq!(dedup.forget_all().await, 1);
            let fresh = dedup.dedupe(key(), || async { Ok(json!("new")) }).await;
            let _ = tx.send(());
            fresh
        };

        let (old, new) = tokio::join!(first, second);
        assert_eq!(old.unwrap(), json!("old"));
        assert_eq!(new.unwrap(), json!("new"));
        assert_eq!(dedup.joins(), 0);
    }
}
