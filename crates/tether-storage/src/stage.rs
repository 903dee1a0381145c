use std::fmt;
use std::sync::Arc;

use crate::{DynEngine, PersistedSnapshot, StorageEngine, StorageResult};

/// One step between the store and the engine.
///
/// `on_load` receives what the previous stage (or the engine) produced and
/// hands its output to the next stage; `on_save` runs the same chain in
/// reverse. Stages must not perform I/O.
pub trait SnapshotStage: Send + Sync {
    fn name(&self) -> &'static str;
    fn on_load(&self, snapshot: PersistedSnapshot) -> StorageResult<PersistedSnapshot>;
    fn on_save(&self, snapshot: PersistedSnapshot) -> StorageResult<PersistedSnapshot>;
}

#[derive(Clone)]
pub struct PersistencePipeline {
    engine: DynEngine,
    stages: Vec<Arc<dyn SnapshotStage>>,
}

impl fmt::Debug for PersistencePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistencePipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl PersistencePipeline {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            engine,
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: Arc<dyn SnapshotStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Read the stored snapshot and run it through every stage; `None` when
    /// nothing has been stored yet.
    pub fn load(&self) -> StorageResult<Option<PersistedSnapshot>> {
        let Some(mut snapshot) = self.engine.load()? else {
            return Ok(None);
        };
        for stage in &self.stages {
            snapshot = stage.on_load(snapshot)?;
        }
        Ok(Some(snapshot))
    }

    pub fn save(&self, snapshot: PersistedSnapshot) -> StorageResult<()> {
        let encoded = self.encode(snapshot)?;
        self.engine.save(&encoded)
    }

    /// Run the save-side stages without writing.
    pub fn encode(&self, mut snapshot: PersistedSnapshot) -> StorageResult<PersistedSnapshot> {
        for stage in self.stages.iter().rev() {
            snapshot = stage.on_save(snapshot)?;
        }
        Ok(snapshot)
    }
}
