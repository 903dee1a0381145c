//! Deterministic state kernel: intents, reducers, and the optimistic projection.
//!
//! Nothing in this crate performs I/O or awaits. Asynchronous collaborators live
//! in `tether-host` and feed results back in as ordinary intents.

pub mod error;
pub mod feedback;
pub mod hydrate;
pub mod intent;
pub mod offline;
pub mod optimistic;
pub mod reducer;
pub mod routing;

pub use error::KernelError;
pub use intent::{Intent, IntentMeta, Origin, Phase, RequestSpec, TransactionId};
pub use offline::{AllowList, OfflineQueueState, QueueEntry, QueueStatus};
pub use optimistic::{OptimisticManager, Transaction, TransactionStatus, Transition};
pub use reducer::{CombinedReducer, Reducer, SliceReducer, StateTree, Typed, reducer_fn};
pub use routing::{Location, NavAction};

/// Prefixes reserved for intents owned by the kernel's built-in slices.
pub const RESERVED_PREFIXES: &[&str] = &[
    "@@offline/",
    "@@router/",
    "@@storage/",
    "@@optimist/",
    "@@feedback/",
];

/// Whether `kind` belongs to one of the built-in slices.
pub fn is_reserved_kind(kind: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|prefix| kind.starts_with(prefix))
}
