//! Display-name extraction from remote resource bodies.

use serde_json::Value;

use crate::types::ResourceType;

/// Field names tried, in order, when looking for a resource's display name.
fn name_fields(resource_type: ResourceType) -> &'static [&'static str] {
    match resource_type {
        ResourceType::Card => &["title", "name"],
        ResourceType::User => &["realname", "username", "email"],
        ResourceType::Workspace | ResourceType::Board | ResourceType::CustomField => {
            &["name", "title"]
        }
    }
}

/// Pull a human-readable name out of a resource body.
///
/// Returns `None` when no candidate field holds a non-blank string, so the
/// caller can substitute a fallback.
pub fn display_name(resource_type: ResourceType, body: &Value) -> Option<String> {
    name_fields(resource_type).iter().find_map(|field| {
        body.get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}
