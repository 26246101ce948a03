//! Shared vocabulary for the kanban mediation layer.
//!
//! Everything here is pure: resource kinds and identifiers, the outbound
//! failure taxonomy, configuration, and display-name extraction. The
//! cache, client and bulk-safety crates all build on these types.

pub mod config;
pub mod error;
pub mod naming;
pub mod types;

pub use error::{ApiError, CoreError, ErrorKind};
pub use types::{ResourceId, ResourceType, Timestamp};
