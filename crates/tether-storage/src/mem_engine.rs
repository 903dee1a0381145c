use crate::{PersistedSnapshot, StorageEngine, StorageResult};
use std::sync::{
    Arc, RwLock,
    atomic::{AtomicUsize, Ordering},
};

/// In-memory engine; encodes through CBOR like [`crate::FsEngine`] so tests
/// exercise the same serialization path. Clones share the same cell.
#[derive(Clone, Default)]
pub struct MemEngine {
    bytes: Arc<RwLock<Option<Vec<u8>>>>,
    writes: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MemEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemEngine")
            .field("writes", &self.write_count())
            .finish()
    }
}

impl MemEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the engine with an existing snapshot without counting a write.
    pub fn with_snapshot(snapshot: &PersistedSnapshot) -> StorageResult<Self> {
        let engine = Self::new();
        *engine.bytes.write().unwrap_or_else(|e| e.into_inner()) =
            Some(serde_cbor::to_vec(snapshot)?);
        Ok(engine)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl StorageEngine for MemEngine {
    fn load(&self) -> StorageResult<Option<PersistedSnapshot>> {
        let guard = self.bytes.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_deref() {
            Some(bytes) => Ok(Some(serde_cbor::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &PersistedSnapshot) -> StorageResult<()> {
        let bytes = serde_cbor::to_vec(snapshot)?;
        *self.bytes.write().unwrap_or_else(|e| e.into_inner()) = Some(bytes);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
