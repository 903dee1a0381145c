use thiserror::Error;

use crate::pipeline::StageKind;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("kernel error: {0}")]
    Kernel(#[from] tether_kernel::KernelError),
    #[error("storage error: {0}")]
    Storage(#[from] tether_storage::StorageError),
    #[error("store has been dropped")]
    StoreClosed,
    #[error("writer error: {0}")]
    Writer(String),
}

/// Configuration problems detected while building the store. All of them
/// abort startup.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("stage {0:?} listed more than once")]
    DuplicateStage(StageKind),
    #[error("required stage {0:?} is missing from the stage list")]
    MissingStage(StageKind),
    #[error("stage {before:?} must run before {after:?}")]
    StageOrder { before: StageKind, after: StageKind },
    #[error("extra middleware '{0}' registered but the stage list has no Extras slot")]
    NoExtrasSlot(String),
    #[error("kernel error: {0}")]
    Kernel(#[from] tether_kernel::KernelError),
    #[error("storage error: {0}")]
    Storage(#[from] tether_storage::StorageError),
    #[error("migration error: {0}")]
    Migration(#[from] tether_storage::MigrationError),
    #[error("a tokio runtime is required: {0}")]
    NoRuntime(String),
}
