//! Test fixtures: small reducers, a recording storage engine, a scripted
//! transport and hand-resolved operations. Enable with the `test-fixtures`
//! feature.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tether_host::{OperationError, OperationFuture, OperationResult, Transport};
use tether_kernel::{Intent, Phase, Reducer, RequestSpec, reducer_fn};
use tether_storage::{
    MemEngine, PersistedSnapshot, StorageEngine, StorageError, StorageResult,
};
use tokio::sync::oneshot;

pub const INCREMENT: &str = "counter/INCREMENT";
pub const DEPOSIT: &str = "account/DEPOSIT";
pub const TODO_ADD: &str = "todo/ADD";

/// `{ "value": n }`; `INCREMENT { by }` adds `by` (default 1).
pub fn counter_reducer() -> Arc<dyn Reducer> {
    reducer_fn(json!({ "value": 0 }), |state, intent| {
        if !intent.is(INCREMENT) || intent.error {
            return state.clone();
        }
        let by = intent.payload.get("by").and_then(Value::as_i64).unwrap_or(1);
        let value = state.get("value").and_then(Value::as_i64).unwrap_or(0);
        json!({ "value": value + by })
    })
}

/// `{ "balance": n }` starting at `initial`.
///
/// `DEPOSIT { amount }` adds the amount on begin or as a plain intent. A
/// commit only changes the balance when the server reports one
/// (`{ "balance": n }`); a revert never does.
pub fn balance_reducer(initial: i64) -> Arc<dyn Reducer> {
    reducer_fn(json!({ "balance": initial }), |state, intent| {
        if !intent.is(DEPOSIT) {
            return state.clone();
        }
        let balance = state.get("balance").and_then(Value::as_i64).unwrap_or(0);
        match intent.phase() {
            Some(Phase::Revert) => state.clone(),
            Some(Phase::Commit) => match intent.payload.get("balance").and_then(Value::as_i64) {
                Some(reported) => json!({ "balance": reported }),
                None => state.clone(),
            },
            _ => {
                let amount = intent.payload.get("amount").and_then(Value::as_i64).unwrap_or(0);
                json!({ "balance": balance + amount })
            }
        }
    })
}

/// `{ "items": [...] }`; `TODO_ADD { title }` appends, except on revert.
pub fn todo_reducer() -> Arc<dyn Reducer> {
    reducer_fn(json!({ "items": [] }), |state, intent| {
        if !intent.is(TODO_ADD) || intent.error || intent.phase() == Some(Phase::Commit) {
            return state.clone();
        }
        let mut next = state.clone();
        if let Some(items) = next.get_mut("items").and_then(Value::as_array_mut) {
            items.push(intent.payload.get("title").cloned().unwrap_or(Value::Null));
        }
        next
    })
}

pub fn deposit(amount: i64) -> Intent {
    Intent::new(DEPOSIT, json!({ "amount": amount }))
}

pub fn increment(by: i64) -> Intent {
    Intent::new(INCREMENT, json!({ "by": by }))
}

/// A todo intent that is sent to `/todos` when a transport is configured.
pub fn add_todo(title: &str) -> Intent {
    Intent::new(TODO_ADD, json!({ "title": title })).with_request(RequestSpec::new(
        "POST",
        "/todos",
        json!({ "title": title }),
    ))
}

/// An operation resolved by hand through the returned [`Resolver`].
pub fn deferred() -> (Resolver, OperationFuture) {
    let (tx, rx) = oneshot::channel();
    let future: OperationFuture = Box::pin(async move {
        rx.await
            .unwrap_or_else(|_| Err(OperationError::new("resolver dropped")))
    });
    (Resolver(tx), future)
}

pub struct Resolver(oneshot::Sender<OperationResult>);

impl Resolver {
    pub fn resolve(self, value: Value) {
        let _ = self.0.send(Ok(value));
    }

    pub fn reject(self, error: OperationError) {
        let _ = self.0.send(Err(error));
    }
}

/// Records every request; answers from per-endpoint scripts, echoing the
/// request body when nothing is scripted.
#[derive(Default)]
pub struct ScriptedTransport {
    calls: Mutex<Vec<RequestSpec>>,
    scripts: Mutex<HashMap<String, VecDeque<OperationResult>>>,
    latency: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Queue the answer for the next call to `endpoint`.
    pub fn script(&self, endpoint: &str, result: OperationResult) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(endpoint.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn calls(&self) -> Vec<RequestSpec> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Request bodies in the order they were sent.
    pub fn bodies(&self) -> Vec<Value> {
        self.calls().into_iter().map(|call| call.body).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: RequestSpec) -> OperationResult {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let scripted = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&request.endpoint)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or(Ok(request.body))
    }
}

/// In-memory engine keeping every snapshot it was asked to save, with a
/// switch to make saves fail.
#[derive(Default)]
pub struct RecordingEngine {
    inner: MemEngine,
    saved: Mutex<Vec<PersistedSnapshot>>,
    failing: AtomicBool,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(snapshot: &PersistedSnapshot) -> StorageResult<Self> {
        Ok(Self {
            inner: MemEngine::with_snapshot(snapshot)?,
            ..Self::default()
        })
    }

    pub fn saved(&self) -> Vec<PersistedSnapshot> {
        self.saved.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn write_count(&self) -> usize {
        self.inner.write_count()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn stored(&self) -> Option<PersistedSnapshot> {
        self.inner.load().ok().flatten()
    }
}

impl StorageEngine for RecordingEngine {
    fn load(&self) -> StorageResult<Option<PersistedSnapshot>> {
        self.inner.load()
    }

    fn save(&self, snapshot: &PersistedSnapshot) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("engine switched to failing".into()));
        }
        self.inner.save(snapshot)?;
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshot.clone());
        Ok(())
    }
}
