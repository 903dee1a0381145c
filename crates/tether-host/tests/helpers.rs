//! Shared helpers for the integration tests.
//!
//! Each integration test compiles this module separately, so some helpers
//! look unused from a given test file.

#![allow(dead_code)]

#[path = "../src/fixtures/mod.rs"]
pub mod fixtures;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tether_host::{App, Store, StoreBuilder, StoreConfig, Unsubscribe};
use tether_kernel::{Intent, StateTree};

/// Defaults with a short debounce and the fixture todo intent allow-listed.
pub fn test_config() -> StoreConfig {
    let mut config = StoreConfig::default();
    config.storage_debounce = Duration::from_millis(100);
    config.storage_namespace = "test".into();
    config.offline.allow_list = vec![fixtures::TODO_ADD.to_string()];
    config
}

/// Builder with the counter, account and todo slices registered.
pub fn builder(config: StoreConfig) -> StoreBuilder {
    StoreBuilder::new(config)
        .reducer("counter", fixtures::counter_reducer())
        .reducer("account", fixtures::balance_reducer(100))
        .reducer("todos", fixtures::todo_reducer())
}

pub async fn start(builder: StoreBuilder) -> App {
    match builder.build() {
        Ok(startup) => startup.ready().await.expect("startup"),
        Err(err) => panic!("build failed: {err}"),
    }
}

pub fn slice(store: &Store, name: &str) -> Value {
    store
        .slice::<Value>(name)
        .expect("slice decodes")
        .unwrap_or(Value::Null)
}

pub fn counter(store: &Store) -> i64 {
    slice(store, "counter")["value"].as_i64().unwrap_or_default()
}

pub fn balance(store: &Store) -> i64 {
    slice(store, "account")["balance"].as_i64().unwrap_or_default()
}

pub fn todos(store: &Store) -> Vec<Value> {
    slice(store, "todos")["items"]
        .as_array()
        .cloned()
        .unwrap_or_default()
}

/// Every intent that reaches the reducers, in order.
pub fn record(store: &Store) -> (Unsubscribe, Arc<Mutex<Vec<Intent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handle = store.subscribe(Arc::new(move |intent: &Intent, _: &Arc<StateTree>| {
        sink.lock().unwrap().push(intent.clone());
    }));
    (handle, seen)
}

/// Let spawned tasks run until `done` holds; panics after a bounded wait.
pub async fn eventually(mut done: impl FnMut() -> bool) {
    for _ in 0..500 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
