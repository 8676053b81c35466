//! Property value to attribute string coercion.

use crate::event::PropertyValue;

/// Render a property value as a destination attribute string.
///
/// Strings pass through untouched, scalars use their JSON text and
/// containers are JSON-encoded. Never fails.
pub fn coerce_to_string(value: &PropertyValue) -> String {
    match value {
        PropertyValue::String(s) => s.clone(),
        PropertyValue::Number(n) => n.to_string(),
        PropertyValue::Bool(b) => b.to_string(),
        PropertyValue::Null => "null".to_string(),
        PropertyValue::List(_) | PropertyValue::Map(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

/// Same as [`coerce_to_string`], wrapped in the one-element list endpoint
/// attributes require.
pub fn coerce_to_list(value: &PropertyValue) -> Vec<String> {
    vec![coerce_to_string(value)]
}
