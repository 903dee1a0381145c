//! Storage lifecycle intents and the merge applied when a snapshot is loaded.

use indexmap::IndexMap;
use serde_json::Value;

use crate::intent::Intent;
use crate::reducer::{CombinedReducer, StateTree};

/// Carries decoded slices from durable storage into the tree.
pub const LOAD: &str = "@@storage/LOAD";
/// Announces that a durable write finished.
pub const SAVE: &str = "@@storage/SAVE";

pub fn load(slices: IndexMap<String, Value>) -> Intent {
    Intent::new(LOAD, Value::Object(slices.into_iter().collect()))
}

pub fn saved(schema_version: u32) -> Intent {
    Intent::new(SAVE, serde_json::json!({ "schemaVersion": schema_version }))
}

/// Objects merge one level deep, everything else replaces. Slices not
/// registered with the reducer are skipped.
pub(crate) fn merge_loaded(reducer: &CombinedReducer, state: &StateTree, loaded: &Value) -> StateTree {
    let mut next = state.clone();
    let Some(loaded) = loaded.as_object() else {
        log::warn!("storage load payload is not an object; ignoring");
        return next;
    };
    for (name, value) in loaded {
        if !reducer.contains(name) {
            log::warn!("loaded slice '{name}' has no reducer; skipping");
            continue;
        }
        let current = state
            .get(name)
            .cloned()
            .or_else(|| reducer.initial_slice(name))
            .unwrap_or(Value::Null);
        next.insert(name.clone(), merge_value(current, value));
    }
    next
}

fn merge_value(current: Value, loaded: &Value) -> Value {
    match (current, loaded) {
        (Value::Object(mut current), Value::Object(loaded)) => {
            for (key, value) in loaded {
                current.insert(key.clone(), value.clone());
            }
            Value::Object(current)
        }
        (_, loaded) => loaded.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::reducer_fn;
    use serde_json::json;

    fn reducer() -> CombinedReducer {
        CombinedReducer::new()
            .with_slice("user", reducer_fn(json!({ "name": null, "session": "s0" }), |s, _| s.clone()))
            .unwrap()
            .with_slice("count", reducer_fn(json!(0), |s, _| s.clone()))
            .unwrap()
    }

    #[test]
    fn load_merges_objects_and_replaces_scalars() {
        let combined = reducer();
        let state = combined.initial_state();
        let mut slices = IndexMap::new();
        slices.insert("user".to_string(), json!({ "name": "x" }));
        slices.insert("count".to_string(), json!(7));
        let next = combined.reduce(&state, &load(slices));
        assert_eq!(next.get("user"), Some(&json!({ "name": "x", "session": "s0" })));
        assert_eq!(next.get("count"), Some(&json!(7)));
    }

    #[test]
    fn unknown_slices_are_skipped() {
        let combined = reducer();
        let state = combined.initial_state();
        let mut slices = IndexMap::new();
        slices.insert("ghost".to_string(), json!(1));
        let next = combined.reduce(&state, &load(slices));
        assert_eq!(next, state);
    }
}
