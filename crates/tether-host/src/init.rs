//! Store construction and startup.
//!
//! Without a storage map the store is usable as soon as [`StoreBuilder::build`]
//! returns ([`Startup::Ready`]). With one, the last snapshot has to be loaded
//! first, so the caller receives [`Startup::Loading`] and awaits
//! [`PendingStartup::ready`].

use std::sync::Arc;

use tether_kernel::feedback::{self, FeedbackReducer};
use tether_kernel::offline::{self, OfflineQueueReducer};
use tether_kernel::routing::{self, RoutingReducer};
use tether_kernel::{CombinedReducer, OptimisticManager, Reducer, Typed, hydrate};
use tether_storage::{
    FieldsCodec, FsEngine, Migration, MigrationChain, PersistencePipeline, StorageEngine,
    StorageMap,
};
use tokio::runtime::Handle;

use crate::config::StoreConfig;
use crate::connectivity::Connectivity;
use crate::debounce::DebouncedWriter;
use crate::error::{HostError, InitError};
use crate::history::{LocationObserver, LocationSource, MemoryHistory, SyncedHistory};
use crate::middleware::{
    FeedbackStage, LoggerStage, OfflineStage, OptimisticStage, PersistStage, RequestStage,
    Transport,
};
use crate::pipeline::{Middleware, Pipeline};
use crate::store::Store;
use crate::ui::ConnectivityBinding;

pub struct StoreBuilder {
    config: StoreConfig,
    storage_map: Option<StorageMap>,
    migrations: Vec<Migration>,
    reducers: Vec<(String, Arc<dyn Reducer>)>,
    middlewares: Vec<Arc<dyn Middleware>>,
    engine: Option<Arc<dyn StorageEngine>>,
    transport: Option<Arc<dyn Transport>>,
    connectivity: Option<Arc<dyn Connectivity>>,
    location: Option<Arc<dyn LocationSource>>,
    on_location_change: Option<LocationObserver>,
}

impl StoreBuilder {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            storage_map: None,
            migrations: Vec::new(),
            reducers: Vec::new(),
            middlewares: Vec::new(),
            engine: None,
            transport: None,
            connectivity: None,
            location: None,
            on_location_change: None,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Enables persistence for the listed slices.
    pub fn storage_map(mut self, map: StorageMap) -> Self {
        self.storage_map = Some(map);
        self
    }

    /// Append a migration; the n-th migration produces schema version n.
    pub fn migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    pub fn migrations(mut self, migrations: impl IntoIterator<Item = Migration>) -> Self {
        self.migrations.extend(migrations);
        self
    }

    pub fn reducer(mut self, name: impl Into<String>, reducer: Arc<dyn Reducer>) -> Self {
        self.reducers.push((name.into(), reducer));
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn StorageEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn location_source(mut self, source: Arc<dyn LocationSource>) -> Self {
        self.location = Some(source);
        self
    }

    pub fn on_location_change<F>(mut self, observer: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_location_change = Some(Arc::new(observer));
        self
    }

    /// Validate the configuration and assemble the store. Must be called
    /// inside a tokio runtime.
    pub fn build(self) -> Result<Startup, InitError> {
        let runtime = Handle::try_current().map_err(|e| InitError::NoRuntime(e.to_string()))?;
        let Self {
            config,
            storage_map,
            migrations,
            reducers,
            middlewares,
            engine,
            transport,
            connectivity,
            location,
            on_location_change,
        } = self;

        let mut reducer = CombinedReducer::new();
        reducer.register(offline::SLICE, Arc::new(Typed(OfflineQueueReducer)))?;
        reducer.register(routing::SLICE, Arc::new(Typed(RoutingReducer)))?;
        reducer.register(
            feedback::SLICE,
            Arc::new(Typed(FeedbackReducer::new(config.feedback.max_notices))),
        )?;
        for (name, slice) in reducers {
            reducer.register(name, slice)?;
        }

        let persistence = match storage_map.filter(|map| !map.is_empty()) {
            Some(map) => Some(persistence_pipeline(&config, &reducer, map, migrations, engine)?),
            None => {
                if !migrations.is_empty() {
                    tracing::warn!("migrations configured without a storage map; persistence is disabled");
                }
                None
            }
        };
        let writer = persistence.as_ref().map(|persistence| {
            DebouncedWriter::spawn(
                persistence.clone(),
                config.storage_debounce,
                config.storage_schema_version,
                &runtime,
            )
        });

        let mut builtins: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(OfflineStage::new(&config.offline)?),
            Arc::new(FeedbackStage::new(config.feedback.clone())),
            Arc::new(RequestStage::new(transport)),
            Arc::new(OptimisticStage),
        ];
        if !config.is_production() {
            builtins.push(Arc::new(LoggerStage::new(config.logger.clone())));
        }
        if let Some(writer) = &writer {
            builtins.push(Arc::new(PersistStage::new(
                writer.clone(),
                config.blacklisted_action_types.iter().cloned(),
            )));
        }
        let pipeline = Pipeline::assemble(&config.stages, builtins, middlewares)?;
        tracing::debug!(stages = ?pipeline.names(), "dispatch pipeline assembled");

        let store = Store::new(OptimisticManager::new(reducer), pipeline, writer, runtime);
        let binder = Binder {
            location: location.unwrap_or_else(|| Arc::new(MemoryHistory::new("/"))),
            on_location_change,
            connectivity,
        };
        Ok(match persistence {
            Some(persistence) => Startup::Loading(PendingStartup {
                store,
                persistence,
                binder,
            }),
            None => Startup::Ready(binder.finish(store)),
        })
    }
}

fn persistence_pipeline(
    config: &StoreConfig,
    reducer: &CombinedReducer,
    mut map: StorageMap,
    migrations: Vec<Migration>,
    engine: Option<Arc<dyn StorageEngine>>,
) -> Result<PersistencePipeline, InitError> {
    let chain = MigrationChain::from_list(config.storage_schema_version, migrations)?;
    chain.validate_from(0)?;

    if !map.contains(offline::SLICE) {
        map.insert(offline::SLICE, Arc::new(FieldsCodec::new(offline::PERSISTED_FIELDS.iter().copied())));
    }
    if map.contains(feedback::SLICE) {
        return Err(InitError::Config("the feedback slice is transient and cannot be persisted".into()));
    }
    for name in map.names() {
        if !reducer.contains(name) {
            tracing::warn!(slice = name, "storage map names a slice without a reducer");
        }
    }

    let engine = match engine {
        Some(engine) => engine,
        None => Arc::new(FsEngine::open(&config.storage_dir, &config.storage_namespace)?),
    };
    Ok(PersistencePipeline::new(engine)
        .stage(Arc::new(chain))
        .stage(Arc::new(map)))
}

struct Binder {
    location: Arc<dyn LocationSource>,
    on_location_change: Option<LocationObserver>,
    connectivity: Option<Arc<dyn Connectivity>>,
}

impl Binder {
    fn finish(self, store: Store) -> App {
        let history = SyncedHistory::bind(&store, self.location, self.on_location_change);
        let connectivity = match &self.connectivity {
            Some(connectivity) => Some(ConnectivityBinding::bind(&store, connectivity.as_ref())),
            None => {
                // No signal to wait for: treat the network as reachable so a
                // restored queue drains.
                if !store.offline_queue().is_empty() {
                    store.dispatch(offline::online());
                }
                None
            }
        };
        App {
            store,
            history,
            connectivity,
        }
    }
}

/// The initialized container: the store and the history bound to it.
#[derive(Debug)]
pub struct App {
    pub store: Store,
    pub history: SyncedHistory,
    connectivity: Option<ConnectivityBinding>,
}

impl App {
    pub fn is_connectivity_bound(&self) -> bool {
        self.connectivity.is_some()
    }

    /// Write any scheduled snapshot and stop forwarding connectivity.
    pub async fn shutdown(self) -> Result<(), HostError> {
        self.store.flush().await
    }
}

/// Persistence is enabled: the snapshot must load before the store is used.
pub struct PendingStartup {
    store: Store,
    persistence: PersistencePipeline,
    binder: Binder,
}

impl PendingStartup {
    /// The store before the snapshot is loaded. Dispatching to it now races
    /// the load; it is exposed for inspection.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Load, migrate and merge the last snapshot, then bind history and
    /// connectivity. Migration and decode failures abort startup.
    pub async fn ready(self) -> Result<App, InitError> {
        match self.persistence.load()? {
            Some(snapshot) => {
                tracing::info!(
                    schema_version = snapshot.schema_version,
                    slices = snapshot.slices.len(),
                    "snapshot loaded"
                );
                self.store.dispatch(hydrate::load(snapshot.slices));
            }
            None => tracing::info!("no stored snapshot; starting from initial state"),
        }
        Ok(self.binder.finish(self.store))
    }
}

pub enum Startup {
    Ready(App),
    Loading(PendingStartup),
}

impl Startup {
    pub fn is_ready(&self) -> bool {
        matches!(self, Startup::Ready(_))
    }

    /// The app, loading the snapshot first if persistence is enabled.
    pub async fn ready(self) -> Result<App, InitError> {
        match self {
            Startup::Ready(app) => Ok(app),
            Startup::Loading(pending) => pending.ready().await,
        }
    }
}

/// Build a store from `builder`; see [`StoreBuilder::build`].
pub fn init_store(builder: StoreBuilder) -> Result<Startup, InitError> {
    builder.build()
}
