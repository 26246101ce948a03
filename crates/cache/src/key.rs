//! Deterministic request signatures.

use std::fmt;

use km_core::{ResourceId, ResourceType};
use serde_json::Value;

/// Signature of a read request: resource type, operation name and
/// normalized parameters.
///
/// Object keys are sorted and `null` members dropped, so two logically
/// identical requests always produce equal keys regardless of how their
/// parameters were assembled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resource_type: ResourceType,
    signature: String,
}

impl CacheKey {
    pub fn new(resource_type: ResourceType, operation: &str, params: &Value) -> Self {
        let mut signature = format!("{resource_type}:{operation}:");
        write_canonical(params, &mut signature);
        Self {
            resource_type,
            signature,
        }
    }

    /// Key for an operation addressed by a single id.
    pub fn for_id(resource_type: ResourceType, operation: &str, id: ResourceId) -> Self {
        Self::new(resource_type, operation, &serde_json::json!({ "id": id }))
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> =
                map.iter().filter(|(_, v)| !v.is_null()).collect();
            members.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (k, v)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
