use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::KernelError;
use crate::hydrate;
use crate::intent::Intent;

/// Named slices of application state, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateTree {
    slices: IndexMap<String, Value>,
}

impl StateTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slice: &str) -> Option<&Value> {
        self.slices.get(slice)
    }

    pub fn insert(&mut self, slice: impl Into<String>, value: Value) {
        self.slices.insert(slice.into(), value);
    }

    /// Decode a slice into its typed form; a missing slice decodes as `None`.
    pub fn slice<T: DeserializeOwned>(&self, slice: &str) -> Result<Option<T>, KernelError> {
        self.slices
            .get(slice)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|source| KernelError::SliceDecode {
                    slice: slice.to_string(),
                    source,
                })
            })
            .transpose()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slices.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.slices.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

impl FromIterator<(String, Value)> for StateTree {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            slices: iter.into_iter().collect(),
        }
    }
}

/// A pure function of (slice state, intent). Implementations must not block or
/// perform I/O; they are re-run when optimistic transactions are recomputed.
pub trait Reducer: Send + Sync {
    fn initial(&self) -> Value;
    fn reduce(&self, state: &Value, intent: &Intent) -> Value;
}

/// Typed variant of [`Reducer`]; wrap in [`Typed`] to register it.
pub trait SliceReducer: Send + Sync {
    type State: Serialize + DeserializeOwned + Default;

    /// Cheap filter so untouched slices skip the decode/encode round trip.
    fn handles(&self, intent: &Intent) -> bool;
    fn reduce(&self, state: Self::State, intent: &Intent) -> Self::State;
}

pub struct Typed<R>(pub R);

impl<R: SliceReducer> Reducer for Typed<R> {
    fn initial(&self) -> Value {
        serde_json::to_value(R::State::default()).unwrap_or(Value::Null)
    }

    fn reduce(&self, state: &Value, intent: &Intent) -> Value {
        if !self.0.handles(intent) {
            return state.clone();
        }
        let current = match serde_json::from_value::<R::State>(state.clone()) {
            Ok(current) => current,
            Err(err) => {
                log::warn!(
                    "slice state did not decode while handling '{}', resetting: {err}",
                    intent.kind
                );
                R::State::default()
            }
        };
        let next = self.0.reduce(current, intent);
        match serde_json::to_value(next) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("slice state did not encode after '{}': {err}", intent.kind);
                state.clone()
            }
        }
    }
}

struct FnReducer<F> {
    initial: Value,
    reduce: F,
}

impl<F> Reducer for FnReducer<F>
where
    F: Fn(&Value, &Intent) -> Value + Send + Sync,
{
    fn initial(&self) -> Value {
        self.initial.clone()
    }

    fn reduce(&self, state: &Value, intent: &Intent) -> Value {
        (self.reduce)(state, intent)
    }
}

/// Build a reducer from an initial value and a closure.
pub fn reducer_fn<F>(initial: Value, reduce: F) -> Arc<dyn Reducer>
where
    F: Fn(&Value, &Intent) -> Value + Send + Sync + 'static,
{
    Arc::new(FnReducer { initial, reduce })
}

/// Routes every intent to each slice reducer; the storage load intent is
/// merged here so slice reducers never see it.
#[derive(Clone, Default)]
pub struct CombinedReducer {
    slices: IndexMap<String, Arc<dyn Reducer>>,
}

impl CombinedReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        reducer: Arc<dyn Reducer>,
    ) -> Result<(), KernelError> {
        let name = name.into();
        if self.slices.contains_key(&name) {
            return Err(KernelError::DuplicateSlice(name));
        }
        self.slices.insert(name, reducer);
        Ok(())
    }

    pub fn with_slice(
        mut self,
        name: impl Into<String>,
        reducer: Arc<dyn Reducer>,
    ) -> Result<Self, KernelError> {
        self.register(name, reducer)?;
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slices.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slices.keys().map(String::as_str)
    }

    pub fn initial_state(&self) -> StateTree {
        self.slices
            .iter()
            .map(|(name, reducer)| (name.clone(), reducer.initial()))
            .collect()
    }

    /// The initial value of a single slice, if registered.
    pub fn initial_slice(&self, name: &str) -> Option<Value> {
        self.slices.get(name).map(|reducer| reducer.initial())
    }

    pub fn reduce(&self, state: &StateTree, intent: &Intent) -> StateTree {
        if intent.is(hydrate::LOAD) {
            return hydrate::merge_loaded(self, state, &intent.payload);
        }
        self.slices
            .iter()
            .map(|(name, reducer)| {
                let next = match state.get(name) {
                    Some(current) => reducer.reduce(current, intent),
                    None => reducer.reduce(&reducer.initial(), intent),
                };
                (name.clone(), next)
            })
            .collect()
    }
}

impl std::fmt::Debug for CombinedReducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedReducer")
            .field("slices", &self.slices.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter() -> Arc<dyn Reducer> {
        reducer_fn(json!(0), |state, intent| match intent.kind.as_str() {
            "inc" => json!(state.as_i64().unwrap_or(0) + 1),
            _ => state.clone(),
        })
    }

    #[test]
    fn combined_reducer_routes_to_every_slice() {
        let combined = CombinedReducer::new()
            .with_slice("a", counter())
            .unwrap()
            .with_slice("b", counter())
            .unwrap();
        let state = combined.initial_state();
        let next = combined.reduce(&state, &Intent::bare("inc"));
        assert_eq!(next.get("a"), Some(&json!(1)));
        assert_eq!(next.get("b"), Some(&json!(1)));
        assert_eq!(next.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn duplicate_slice_is_rejected() {
        let err = CombinedReducer::new()
            .with_slice("a", counter())
            .unwrap()
            .with_slice("a", counter())
            .unwrap_err();
        assert!(matches!(err, KernelError::DuplicateSlice(name) if name == "a"));
    }

    #[test]
    fn missing_slice_starts_from_initial() {
        let combined = CombinedReducer::new().with_slice("a", counter()).unwrap();
        let next = combined.reduce(&StateTree::new(), &Intent::bare("inc"));
        assert_eq!(next.get("a"), Some(&json!(1)));
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Names {
        names: Vec<String>,
    }

    struct NamesReducer;

    impl SliceReducer for NamesReducer {
        type State = Names;

        fn handles(&self, intent: &Intent) -> bool {
            intent.is("add")
        }

        fn reduce(&self, mut state: Names, intent: &Intent) -> Names {
            if let Some(name) = intent.payload.as_str() {
                state.names.push(name.to_string());
            }
            state
        }
    }

    #[test]
    fn typed_reducer_round_trips_through_json() {
        let reducer = Typed(NamesReducer);
        let initial = reducer.initial();
        assert_eq!(initial, json!({ "names": [] }));
        let next = reducer.reduce(&initial, &Intent::new("add", json!("ada")));
        assert_eq!(next, json!({ "names": ["ada"] }));
        let untouched = reducer.reduce(&next, &Intent::bare("other"));
        assert_eq!(untouched, next);
    }
}
