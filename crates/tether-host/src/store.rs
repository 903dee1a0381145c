//! The store handle: the optimistic manager behind a mutex, the dispatch
//! pipeline in front of it, and the listeners notified after each applied
//! intent.
//!
//! The manager lock is held only while a single intent is reduced. Stages,
//! listeners and spawned tasks never run under it, so any of them may
//! dispatch again.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::de::DeserializeOwned;
use tether_kernel::offline::{self, OfflineQueueState};
use tether_kernel::{Intent, OptimisticManager, StateTree, TransactionId, Transition};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::action::{Action, Dispatched};
use crate::debounce::DebouncedWriter;
use crate::error::HostError;
use crate::pipeline::Pipeline;

/// Called after every intent that reached the reducers, with the new
/// optimistic state.
pub type Listener = Arc<dyn Fn(&Intent, &Arc<StateTree>) + Send + Sync>;

struct StoreInner {
    manager: Mutex<OptimisticManager>,
    pipeline: Pipeline,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    writer: Option<DebouncedWriter>,
    runtime: Handle,
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("pipeline", &self.inner.pipeline)
            .field("persistence", &self.inner.writer.is_some())
            .finish_non_exhaustive()
    }
}

impl Store {
    pub(crate) fn new(
        manager: OptimisticManager,
        pipeline: Pipeline,
        writer: Option<DebouncedWriter>,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                manager: Mutex::new(manager),
                pipeline,
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                writer,
                runtime,
            }),
        }
    }

    /// Run an intent or pending operation through the pipeline. Returns once
    /// every synchronous effect (including an optimistic begin) is applied.
    pub fn dispatch(&self, action: impl Into<Action>) -> Dispatched {
        let base = |action: Action| self.reduce(action);
        self.inner.pipeline.run(self, action.into(), &base)
    }

    /// State including pending transactions.
    pub fn state(&self) -> Arc<StateTree> {
        self.manager().optimistic()
    }

    /// State without pending transactions; what gets persisted.
    pub fn confirmed_state(&self) -> Arc<StateTree> {
        self.manager().confirmed()
    }

    pub fn slice<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, HostError> {
        Ok(self.state().slice(name)?)
    }

    pub fn offline_queue(&self) -> OfflineQueueState {
        match self.state().slice::<OfflineQueueState>(offline::SLICE) {
            Ok(Some(state)) => state,
            Ok(None) => OfflineQueueState::default(),
            Err(err) => {
                tracing::warn!(error = %err, "offline queue slice did not decode");
                OfflineQueueState::default()
            }
        }
    }

    /// Ids of pending transactions in begin order.
    pub fn pending_transactions(&self) -> Vec<TransactionId> {
        self.manager().pending().iter().map(|tx| tx.id.clone()).collect()
    }

    pub fn subscribe(&self, listener: Listener) -> Unsubscribe {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners().push((id, listener));
        Unsubscribe {
            store: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore(Arc::downgrade(&self.inner))
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Write any scheduled snapshot now. No-op without persistence.
    pub async fn flush(&self) -> Result<(), HostError> {
        match &self.inner.writer {
            Some(writer) => writer.flush().await,
            None => Ok(()),
        }
    }

    /// Drop a scheduled snapshot before its timer fires.
    pub fn cancel_pending_write(&self) {
        if let Some(writer) = &self.inner.writer {
            writer.cancel();
        }
    }

    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.runtime.spawn(future)
    }

    fn reduce(&self, action: Action) -> Dispatched {
        let intent = match action {
            Action::Intent(intent) => intent,
            Action::Operation(op) => {
                tracing::warn!(kind = %op.intent.kind, "pending operation reached the reducers; no optimistic stage handled it");
                return Dispatched::Dropped {
                    reason: format!("unhandled pending operation '{}'", op.intent.kind),
                };
            }
        };
        let (transition, state) = {
            let mut manager = self.manager();
            let transition = manager.apply(&intent);
            (transition, manager.optimistic())
        };
        if let Transition::Ignored(err) = transition {
            return Dispatched::Dropped {
                reason: err.to_string(),
            };
        }
        self.notify(&intent, &state);
        Dispatched::Applied(state)
    }

    fn notify(&self, intent: &Intent, state: &Arc<StateTree>) {
        let listeners: Vec<Listener> = self
            .listeners()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(intent, state))).is_err() {
                tracing::error!(kind = %intent.kind, "store listener panicked");
            }
        }
    }

    fn manager(&self) -> MutexGuard<'_, OptimisticManager> {
        self.inner
            .manager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Non-owning store handle for background tasks that must not keep the
/// store alive.
#[derive(Clone)]
pub struct WeakStore(Weak<StoreInner>);

impl WeakStore {
    pub fn upgrade(&self) -> Option<Store> {
        self.0.upgrade().map(|inner| Store { inner })
    }

    pub fn dispatch(&self, action: impl Into<Action>) -> Result<Dispatched, HostError> {
        let store = self.upgrade().ok_or(HostError::StoreClosed)?;
        Ok(store.dispatch(action))
    }
}

#[must_use = "dropping the handle keeps the listener registered"]
pub struct Unsubscribe {
    store: Weak<StoreInner>,
    id: u64,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.store.upgrade() {
            inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}
