//! Durable snapshot storage: engines, slice codecs, and schema migrations.
//!
//! A [`PersistencePipeline`] composes an engine with an explicit list of
//! [`SnapshotStage`]s. Loading runs the stages front to back, saving runs them
//! back to front, so the canonical `[migrate, select]` order reads as
//! "engine -> migrate -> select" on the way in and the reverse on the way out.

mod codec;
mod fs_engine;
mod mem_engine;
pub mod migrate;
mod snapshot;
mod stage;

pub use codec::{FieldsCodec, IdentityCodec, SliceCodec, StorageMap};
pub use fs_engine::FsEngine;
pub use mem_engine::MemEngine;
pub use migrate::{Migration, MigrationChain, MigrationError};
pub use snapshot::{PersistedSnapshot, Slices};
pub use stage::{PersistencePipeline, SnapshotStage};

use std::{io, path::PathBuf, sync::Arc};

pub type StorageResult<T> = Result<T, StorageError>;
pub type DynEngine = Arc<dyn StorageEngine>;

/// A durable medium holding at most one snapshot per engine instance.
///
/// `save` must replace the previous snapshot atomically: a failed save leaves
/// the previous snapshot readable.
pub trait StorageEngine: Send + Sync {
    fn load(&self) -> StorageResult<Option<PersistedSnapshot>>;
    fn save(&self, snapshot: &PersistedSnapshot) -> StorageResult<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CBOR serialization error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    #[error("codec for slice '{slice}' failed: {message}")]
    Codec { slice: String, message: String },
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub(crate) fn io_error(path: impl Into<PathBuf>, err: io::Error) -> StorageError {
    StorageError::Io {
        path: path.into(),
        source: err,
    }
}
