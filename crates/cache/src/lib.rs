//! Response cache and single-flight deduplication for remote reads.
//!
//! - [`TtlCache`] holds last-known values per request signature, with lazy
//!   expiry and hit/miss counters.
//! - [`RequestDeduplicator`] collapses identical in-flight reads into one
//!   underlying call.
//! - [`CacheService`] keeps one cache + deduplicator per [`ResourceType`],
//!   exposing the composed read path and write invalidation.
//!
//! [`ResourceType`]: km_core::ResourceType

pub mod dedup;
pub mod key;
pub mod service;
pub mod ttl;

pub use dedup::{RequestDeduplicator, Role};
pub use key::CacheKey;
pub use service::{CacheService, CacheStats};
pub use ttl::{CacheEntry, TtlCache};
