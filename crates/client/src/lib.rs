//! Outbound access to the remote work-tracking API.
//!
//! - [`ResourceClient`] is the per-resource read/write contract everything
//!   else depends on. Failures are typed [`ApiError`]s carrying a
//!   permanent/transient classification.
//! - [`CachedClient`] wraps any client with the shared cache service:
//!   reads are cached and deduplicated, writes invalidate, and every call
//!   is bounded by a timeout.
//! - [`HttpClient`] is the `reqwest`-backed implementation against the REST API.
//!
//! [`ApiError`]: km_core::ApiError

pub mod cached;
pub mod client;
pub mod http;
#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use cached::CachedClient;
pub use client::ResourceClient;
pub use http::HttpClient;
