use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Remote identifiers are positive integers, unique within a resource type.
pub type ResourceId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

// ---------------------------------------------------------------------------
// ResourceType
// ---------------------------------------------------------------------------

/// Kind of entity exposed by the remote work-tracking API.
///
/// Each kind owns its own cache namespace and selects which dependency
/// probe runs before a destructive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Workspace,
    Board,
    Card,
    CustomField,
    User,
}

impl ResourceType {
    /// Every resource type, in a stable order.
    pub const ALL: [ResourceType; 5] = [
        Self::Workspace,
        Self::Board,
        Self::Card,
        Self::CustomField,
        Self::User,
    ];

    /// Machine name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Board => "board",
            Self::Card => "card",
            Self::CustomField => "custom_field",
            Self::User => "user",
        }
    }

    /// Human-readable singular label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Workspace => "Workspace",
            Self::Board => "Board",
            Self::Card => "Card",
            Self::CustomField => "Custom field",
            Self::User => "User",
        }
    }

    /// Lower-case plural used in report sentences ("3 boards").
    pub fn plural(self) -> &'static str {
        match self {
            Self::Workspace => "workspaces",
            Self::Board => "boards",
            Self::Card => "cards",
            Self::CustomField => "custom fields",
            Self::User => "users",
        }
    }

    /// Singular or plural noun depending on `count`.
    pub fn noun(self, count: usize) -> &'static str {
        if count == 1 {
            match self {
                Self::Workspace => "workspace",
                Self::Board => "board",
                Self::Card => "card",
                Self::CustomField => "custom field",
                Self::User => "user",
            }
        } else {
            self.plural()
        }
    }

    /// Deterministic name used when the real one could not be resolved.
    pub fn fallback_name(self, id: ResourceId) -> String {
        format!("{} {id}", self.label())
    }

    /// Cache namespaces made stale by a successful write to this type.
    ///
    /// Always includes `self`. Board writes can change card listings, and
    /// workspace writes can change both board and card listings.
    pub fn invalidates(self) -> &'static [ResourceType] {
        match self {
            Self::Workspace => &[Self::Workspace, Self::Board, Self::Card],
            Self::Board => &[Self::Board, Self::Card],
            Self::Card => &[Self::Card],
            Self::CustomField => &[Self::CustomField],
            Self::User => &[Self::User],
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "workspace" | "workspaces" => Ok(Self::Workspace),
            "board" | "boards" => Ok(Self::Board),
            "card" | "cards" => Ok(Self::Card),
            "custom_field" | "custom_fields" => Ok(Self::CustomField),
            "user" | "users" => Ok(Self::User),
            other => Err(CoreError::Validation(format!(
                "Unknown resource type: '{other}'. \
                 Valid types: workspace, board, card, custom_field, user"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_name_uses_label_and_id() {
        assert_eq!(ResourceType::Board.fallback_name(7), "Board 7");
        assert_eq!(ResourceType::CustomField.fallback_name(12), "Custom field 12");
    }

    #[test]
    fn parse_accepts_plural_and_dashes() {
        assert_eq!("boards".parse::<ResourceType>().unwrap(), ResourceType::Board);
        assert_eq!(
            "custom-field".parse::<ResourceType>().unwrap(),
            ResourceType::CustomField
        );
        assert_eq!(" Card ".parse::<ResourceType>().unwrap(), ResourceType::Card);
    }

    #[test]
    fn parse_rejects_unknown() {
        let err = "lane".parse::<ResourceType>().unwrap_err();
        assert!(err.to_string().ends_with(
            "Unknown resource type: 'lane'. \
             Valid types: workspace, board, card, custom_field, user"
        ));
    }

    #[test]
    fn display_matches_serde_name() {
        for t in ResourceType::ALL {
            let json = serde_json::to_value(t).unwrap();
            assert_eq!(json, serde_json::Value::String(t.to_string()));
        }
    }

    #[test]
    fn every_type_invalidates_itself() {
        for t in ResourceType::ALL {
            assert!(t.invalidates().contains(&t), "{t} must invalidate itself");
        }
        assert!(ResourceType::Board.invalidates().contains(&ResourceType::Card));
    }

    #[test]
    fn noun_picks_singular_for_one() {
        assert_eq!(ResourceType::Board.noun(1), "board");
        assert_eq!(ResourceType::Board.noun(3), "boards");
        assert_eq!(ResourceType::User.noun(0), "users");
    }
}
