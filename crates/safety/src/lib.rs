//! Bulk-mutation safety layer.
//!
//! Applies one mutation across many resources without surprising anyone:
//!
//! - [`DependencyAnalyzer`] estimates the blast radius of a destructive
//!   operation and resolves display names up front.
//! - [`confirmation`] turns an analysis into an auto-proceed decision or
//!   a confirmation prompt, and formats post-execution summaries from the
//!   pre-resolved names.
//! - [`BulkExecutor`] runs the mutation per item with failure isolation,
//!   transient-error retry and order-preserving results.
//! - [`BulkService`] wires the three together behind one entry point.

pub mod confirmation;
pub mod dependency;
pub mod executor;
pub mod operation;
pub mod retry;
pub mod service;

pub use confirmation::{build_confirmation, ConfirmationDecision, NameMap, PreflightReport};
pub use dependency::{
    DependencyAnalysis, DependencyAnalyzer, DependencyProbe, DependentKind, ResourceImpact,
};
pub use executor::{BulkExecutor, BulkItemResult, FailureReason, ItemState};
pub use operation::{BulkAction, BulkOperation};
pub use retry::{Attempted, RetryPolicy};
pub use service::{BulkOutcome, BulkReport, BulkRequest, BulkService, MAX_BULK_ITEMS};
