//! Asynchronous host for the tether state container.
//!
//! The kernel is deterministic and never awaits; this crate is where pending
//! operations, durable writes, connectivity and the location primitive live.
//! Each of them re-enters the store by dispatching an ordinary intent.

extern crate self as tether_host;

pub mod action;
pub mod config;
pub mod connectivity;
pub mod debounce;
pub mod error;
pub mod history;
pub mod init;
pub mod logging;
pub mod middleware;
pub mod pipeline;
pub mod store;
pub mod ui;
mod util;

#[cfg(any(feature = "test-fixtures", test))]
pub mod fixtures;

pub use action::{
    Action, Dispatched, OperationError, OperationFuture, OperationResult, PendingOperation,
    Settlement,
};
pub use config::{
    Environment, FeedbackOptions, LoggerOptions, OfflineOptions, ReplayFailurePolicy,
    ReplayOrdering, StoreConfig,
};
pub use connectivity::{Connectivity, ManualConnectivity};
pub use debounce::DebouncedWriter;
pub use error::{HostError, InitError};
pub use history::{
    LocationListener, LocationObserver, LocationSource, MemoryHistory, SyncedHistory, Unlisten,
};
pub use init::{App, PendingStartup, Startup, StoreBuilder, init_store};
pub use logging::{init_tracing, try_init_tracing};
pub use middleware::Transport;
pub use pipeline::{CANONICAL_ORDER, Middleware, Next, Pipeline, StageKind};
pub use store::{Listener, Store, Unsubscribe, WeakStore};
pub use ui::{ConnectivityBinding, ToastView, connectivity_banner};
pub use util::now_ms;
