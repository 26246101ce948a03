use std::sync::Arc;
use std::time::Duration;

use km_cache::CacheService;
use km_client::mock::MockClient;
use km_client::CachedClient;
use km_core::config::{MediatorConfig, RetryConfig};
use km_core::{ResourceId, ResourceType};
use km_safety::BulkService;

/// Config with millisecond backoff so retry tests stay fast.
pub fn test_config() -> MediatorConfig {
    MediatorConfig {
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
        },
        ..Default::default()
    }
}

/// Mock holding boards `ids`, each named after its id and with no cards.
pub fn empty_boards(ids: impl IntoIterator<Item = ResourceId>) -> MockClient {
    ids.into_iter().fold(MockClient::new(), |mock, id| {
        mock.with_named(ResourceType::Board, id, &format!("Board {id}"))
    })
}

/// Bulk service directly on top of `mock`.
pub fn direct_service(mock: &Arc<MockClient>) -> BulkService<MockClient> {
    BulkService::new(Arc::clone(mock), &test_config())
}

/// Bulk service on top of a cached wrapper around `mock`, as wired in
/// production.
pub fn cached_service(
    mock: MockClient,
) -> (
    BulkService<CachedClient<MockClient>>,
    Arc<CachedClient<MockClient>>,
) {
    let config = test_config();
    let cache = Arc::new(CacheService::new(&config.cache));
    let client = Arc::new(CachedClient::from_config(mock, cache, &config));
    (BulkService::new(Arc::clone(&client), &config), client)
}
