//! Step input resolution.
//!
//! A step's input mapping is turned into a JSON object just before each
//! attempt. String values of the form `context.<key>` are replaced with the
//! current context value at `<key>` (`null` when absent); every other value
//! is passed through as a literal.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use stepflow_types::workflow::SharedContext;

/// Prefix marking a context reference in an input mapping.
pub const CONTEXT_REF_PREFIX: &str = "context.";

/// Build the input object for a step from its mapping and the live context.
pub fn resolve_input(mapping: Option<&BTreeMap<String, Value>>, context: &SharedContext) -> Value {
    let Some(mapping) = mapping else {
        return Value::Object(Map::new());
    };

    let resolved: Map<String, Value> = mapping
        .iter()
        .map(|(name, value)| (name.clone(), resolve_value(value, context)))
        .collect();
    Value::Object(resolved)
}

fn resolve_value(value: &Value, context: &SharedContext) -> Value {
    match value.as_str().and_then(|s| s.strip_prefix(CONTEXT_REF_PREFIX)) {
        Some(key) => context.get(key).cloned().unwrap_or(Value::Null),
        None => value.clone(),
    }
}
