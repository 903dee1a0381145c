mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::fixtures::{self, RecordingEngine};
use helpers::{balance, builder, counter, slice, start, test_config, todos};
use serde_json::{Value, json};
use tether_host::{InitError, PendingOperation, StoreBuilder};
use tether_kernel::{offline, reducer_fn};
use tether_storage::{
    Migration, MigrationError, PersistedSnapshot, Slices, StorageError, StorageMap,
};

fn counter_map() -> StorageMap {
    StorageMap::new().slice("counter")
}

fn user_builder(schema_version: u32, engine: Arc<RecordingEngine>) -> StoreBuilder {
    let mut config = test_config();
    config.storage_schema_version = schema_version;
    StoreBuilder::new(config)
        .reducer("user", reducer_fn(json!({}), |state, _| state.clone()))
        .storage_map(StorageMap::new().slice("user"))
        .engine(engine)
}

fn snapshot(version: u32, slices: &[(&str, Value)]) -> PersistedSnapshot {
    let slices: Slices = slices
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect();
    PersistedSnapshot::new(version, slices)
}

fn set_field(slice: &'static str, field: &'static str, value: Value) -> Migration {
    Arc::new(move |mut slices: Slices| {
        if let Some(Value::Object(map)) = slices.get_mut(slice) {
            map.insert(field.to_string(), value.clone());
        }
        Ok(slices)
    })
}

#[tokio::test(start_paused = true)]
async fn burst_of_changes_is_written_once() {
    let engine = Arc::new(RecordingEngine::new());
    let app = start(
        builder(test_config())
            .storage_map(counter_map())
            .engine(engine.clone()),
    )
    .await;

    for _ in 0..3 {
        app.store.dispatch(fixtures::increment(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(engine.write_count(), 0);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let saved = engine.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].slice("counter"), Some(&json!({ "value": 3 })));
}

#[tokio::test(start_paused = true)]
async fn separated_changes_are_written_separately() {
    let engine = Arc::new(RecordingEngine::new());
    let app = start(
        builder(test_config())
            .storage_map(counter_map())
            .engine(engine.clone()),
    )
    .await;

    app.store.dispatch(fixtures::increment(1));
    tokio::time::sleep(Duration::from_millis(300)).await;
    app.store.dispatch(fixtures::increment(1));
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(engine.write_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn navigation_does_not_trigger_writes() {
    let engine = Arc::new(RecordingEngine::new());
    let app = start(
        builder(test_config())
            .storage_map(counter_map())
            .engine(engine.clone()),
    )
    .await;

    app.history.push("/settings");
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(engine.write_count(), 0);
}

#[tokio::test]
async fn snapshot_restores_mapped_slices_only() {
    let engine = Arc::new(RecordingEngine::new());
    let first = start(
        builder(test_config())
            .storage_map(counter_map())
            .engine(engine.clone()),
    )
    .await;
    first.store.dispatch(fixtures::increment(5));
    first.store.dispatch(fixtures::deposit(20));
    first.store.dispatch(fixtures::add_todo("milk"));
    first.shutdown().await.unwrap();

    let stored = engine.stored().expect("snapshot written");
    let names: Vec<&str> = stored.slices.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["counter", offline::SLICE]);
    assert_eq!(
        stored.slice(offline::SLICE),
        Some(&json!({ "queue": [], "nextSequence": 0 }))
    );

    let second = start(
        builder(test_config())
            .storage_map(counter_map())
            .engine(engine.clone()),
    )
    .await;
    assert_eq!(counter(&second.store), 5);
    assert_eq!(balance(&second.store), 100);
    assert!(todos(&second.store).is_empty());
}

#[tokio::test]
async fn tentative_results_are_not_persisted() {
    let engine = Arc::new(RecordingEngine::new());
    let app = start(
        builder(test_config())
            .storage_map(StorageMap::new().slice("account").slice("counter"))
            .engine(engine.clone()),
    )
    .await;
    let (resolver, future) = fixtures::deferred();

    let settlement = app
        .store
        .dispatch(PendingOperation::new(fixtures::deposit(10), future))
        .into_settlement()
        .unwrap();
    app.store.dispatch(fixtures::increment(1));
    app.store.flush().await.unwrap();
    assert_eq!(balance(&app.store), 110);
    assert_eq!(
        engine.stored().unwrap().slice("account"),
        Some(&json!({ "balance": 100 }))
    );

    resolver.resolve(json!({}));
    settlement.settled().await.unwrap();
    app.store.flush().await.unwrap();
    assert_eq!(
        engine.stored().unwrap().slice("account"),
        Some(&json!({ "balance": 110 }))
    );
}

#[tokio::test]
async fn failed_write_keeps_the_previous_snapshot() {
    let engine = Arc::new(RecordingEngine::new());
    let app = start(
        builder(test_config())
            .storage_map(counter_map())
            .engine(engine.clone()),
    )
    .await;
    app.store.dispatch(fixtures::increment(1));
    app.store.flush().await.unwrap();

    engine.set_failing(true);
    app.store.dispatch(fixtures::increment(1));
    assert!(app.store.flush().await.is_err());
    assert_eq!(
        engine.stored().unwrap().slice("counter"),
        Some(&json!({ "value": 1 }))
    );
    assert_eq!(counter(&app.store), 2);

    engine.set_failing(false);
    app.store.flush().await.unwrap();
    assert_eq!(
        engine.stored().unwrap().slice("counter"),
        Some(&json!({ "value": 2 }))
    );
}

#[tokio::test]
async fn cancelled_write_is_dropped() {
    let engine = Arc::new(RecordingEngine::new());
    let app = start(
        builder(test_config())
            .storage_map(counter_map())
            .engine(engine.clone()),
    )
    .await;

    app.store.dispatch(fixtures::increment(1));
    app.store.cancel_pending_write();
    app.store.flush().await.unwrap();

    assert_eq!(engine.write_count(), 0);
}

#[tokio::test]
async fn stored_snapshot_is_migrated_on_startup() {
    let engine = Arc::new(
        RecordingEngine::seeded(&snapshot(0, &[("user", json!({ "name": "x" }))])).unwrap(),
    );

    let app = start(
        user_builder(1, engine.clone()).migration(set_field("user", "active", json!(true))),
    )
    .await;

    assert_eq!(slice(&app.store, "user"), json!({ "name": "x", "active": true }));
}

#[tokio::test]
async fn migrations_apply_in_sequence() {
    let engine = Arc::new(
        RecordingEngine::seeded(&snapshot(0, &[("user", json!({ "name": "x" }))])).unwrap(),
    );
    let rename: Migration = Arc::new(|mut slices: Slices| {
        if let Some(Value::Object(user)) = slices.get_mut("user") {
            if let Some(name) = user.remove("name") {
                user.insert("displayName".into(), name);
            }
        }
        Ok(slices)
    });

    let app = start(
        user_builder(2, engine.clone())
            .migration(set_field("user", "active", json!(true)))
            .migration(rename),
    )
    .await;

    assert_eq!(
        slice(&app.store, "user"),
        json!({ "active": true, "displayName": "x" })
    );
    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn snapshot_is_written_at_the_current_schema_version() {
    let engine = Arc::new(
        RecordingEngine::seeded(&snapshot(0, &[("user", json!({ "name": "x" }))])).unwrap(),
    );
    let app = start(
        user_builder(1, engine.clone()).migration(set_field("user", "active", json!(true))),
    )
    .await;

    app.store.dispatch(fixtures::increment(1));
    app.store.flush().await.unwrap();

    let stored = engine.stored().unwrap();
    assert_eq!(stored.schema_version, 1);
    assert_eq!(stored.slice("user"), Some(&json!({ "name": "x", "active": true })));
}

#[tokio::test]
async fn missing_migration_aborts_startup() {
    let engine = Arc::new(RecordingEngine::new());

    let result = user_builder(2, engine)
        .migration(set_field("user", "active", json!(true)))
        .build();

    assert!(matches!(
        result,
        Err(InitError::Migration(MigrationError::Missing { version: 2 }))
    ));
}

#[tokio::test]
async fn snapshot_from_a_newer_schema_aborts_startup() {
    let engine = Arc::new(RecordingEngine::seeded(&snapshot(3, &[("user", json!({}))])).unwrap());

    let startup = match user_builder(0, engine).build() {
        Ok(startup) => startup,
        Err(err) => panic!("build failed: {err}"),
    };
    assert!(!startup.is_ready());

    assert!(matches!(
        startup.ready().await,
        Err(InitError::Storage(StorageError::Migration(
            MigrationError::FutureVersion { stored: 3, current: 0 }
        )))
    ));
}

#[tokio::test]
async fn failing_migration_aborts_startup() {
    let engine = Arc::new(
        RecordingEngine::seeded(&snapshot(0, &[("user", json!({ "name": "x" }))])).unwrap(),
    );
    let broken: Migration = Arc::new(|_| Err(anyhow::anyhow!("unexpected shape")));

    let startup = match user_builder(1, engine).migration(broken).build() {
        Ok(startup) => startup,
        Err(err) => panic!("build failed: {err}"),
    };

    assert!(matches!(
        startup.ready().await,
        Err(InitError::Storage(StorageError::Migration(
            MigrationError::Failed { version: 1, .. }
        )))
    ));
}

#[tokio::test]
async fn feedback_slice_cannot_be_persisted() {
    let result = builder(test_config())
        .storage_map(StorageMap::new().slice(tether_kernel::feedback::SLICE))
        .engine(Arc::new(RecordingEngine::new()))
        .build();

    assert!(matches!(result, Err(InitError::Config(_))));
}

#[tokio::test]
async fn default_engine_writes_under_the_storage_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.storage_dir = dir.path().to_path_buf();

    let app = start(builder(config.clone()).storage_map(counter_map())).await;
    app.store.dispatch(fixtures::increment(4));
    app.shutdown().await.unwrap();
    assert!(dir.path().join(".tether").join("test.snapshot").exists());

    let restored = start(builder(config).storage_map(counter_map())).await;
    assert_eq!(counter(&restored.store), 4);
}

#[tokio::test]
async fn store_without_storage_map_is_ready_immediately() {
    let startup = match builder(test_config()).build() {
        Ok(startup) => startup,
        Err(err) => panic!("build failed: {err}"),
    };
    assert!(startup.is_ready());
}
