//! Mutations that can be applied in bulk.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of mutation, without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Delete,
    Archive,
    Update,
}

impl BulkAction {
    pub fn verb(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Archive => "archive",
            Self::Update => "update",
        }
    }

    pub fn gerund(self) -> &'static str {
        match self {
            Self::Delete => "Deleting",
            Self::Archive => "Archiving",
            Self::Update => "Updating",
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Delete => "deleted",
            Self::Archive => "archived",
            Self::Update => "updated",
        }
    }

    /// Whether the mutation can remove or hide dependents, and therefore
    /// goes through dependency analysis first.
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::Delete | Self::Archive)
    }
}

/// A mutation plus its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    /// Remove the resource. For cards, `archive_first` archives before
    /// deleting, as the remote API requires for cards still in use.
    Delete { archive_first: bool },
    Archive,
    /// Apply the same field changes to every resource.
    Update(Value),
}

impl BulkOperation {
    /// Plain delete with the default card behaviour (archive first).
    pub fn delete() -> Self {
        Self::Delete {
            archive_first: true,
        }
    }

    pub fn action(&self) -> BulkAction {
        match self {
            Self::Delete { .. } => BulkAction::Delete,
            Self::Archive => BulkAction::Archive,
            Self::Update(_) => BulkAction::Update,
        }
    }
}
