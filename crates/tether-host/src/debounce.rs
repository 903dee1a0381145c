//! Debounced snapshot writer.
//!
//! One worker task per engine owns the pending payload and the deadline.
//! Scheduling while a write is pending replaces the payload and pushes the
//! deadline out by the debounce interval, so a burst of changes produces a
//! single write of the last state. Writes run inline on the worker, never two
//! at once.

use std::sync::Arc;
use std::time::Duration;

use tether_kernel::{StateTree, hydrate};
use tether_storage::{PersistedSnapshot, PersistencePipeline, Slices};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::HostError;
use crate::store::{Store, WeakStore};

enum Command {
    Schedule {
        state: Arc<StateTree>,
        store: Option<WeakStore>,
    },
    Flush(oneshot::Sender<Result<(), HostError>>),
    Cancel,
}

#[derive(Clone)]
pub struct DebouncedWriter {
    tx: mpsc::UnboundedSender<Command>,
    debounce: Duration,
}

impl std::fmt::Debug for DebouncedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedWriter")
            .field("debounce", &self.debounce)
            .finish()
    }
}

impl DebouncedWriter {
    /// Start the worker on `runtime`. It stops, writing anything still
    /// pending, once every writer handle is dropped.
    pub fn spawn(
        persistence: PersistencePipeline,
        debounce: Duration,
        schema_version: u32,
        runtime: &Handle,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            persistence,
            debounce,
            schema_version,
            pending: None,
            deadline: None,
            store: None,
        };
        runtime.spawn(worker.run(rx));
        Self { tx, debounce }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn schedule(&self, state: Arc<StateTree>) {
        self.send(Command::Schedule { state, store: None });
    }

    /// Schedule a write and announce it on `store` with a storage SAVE intent.
    pub(crate) fn schedule_from(&self, store: &Store, state: Arc<StateTree>) {
        self.send(Command::Schedule {
            state,
            store: Some(store.downgrade()),
        });
    }

    /// Write the pending payload now, if any.
    pub async fn flush(&self) -> Result<(), HostError> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Flush(tx)).is_err() {
            return Err(HostError::Writer("writer task has stopped".into()));
        }
        rx.await
            .map_err(|_| HostError::Writer("writer task dropped the flush request".into()))?
    }

    /// Drop the pending payload before its deadline.
    pub fn cancel(&self) {
        self.send(Command::Cancel);
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            tracing::warn!("snapshot writer has stopped; write request dropped");
        }
    }
}

struct Worker {
    persistence: PersistencePipeline,
    debounce: Duration,
    schema_version: u32,
    pending: Option<Arc<StateTree>>,
    deadline: Option<Instant>,
    store: Option<WeakStore>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        if self.pending.is_some() {
                            let _ = self.write();
                        }
                        break;
                    }
                },
                _ = sleep_until(deadline) => {
                    self.deadline = None;
                    let _ = self.write();
                }
            }
        }
        tracing::debug!("snapshot writer stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Schedule { state, store } => {
                self.pending = Some(state);
                if store.is_some() {
                    self.store = store;
                }
                self.deadline = Some(Instant::now() + self.debounce);
            }
            Command::Flush(done) => {
                self.deadline = None;
                let result = if self.pending.is_some() {
                    self.write()
                } else {
                    Ok(())
                };
                let _ = done.send(result);
            }
            Command::Cancel => {
                if self.pending.take().is_some() {
                    tracing::debug!("scheduled snapshot write cancelled");
                }
                self.deadline = None;
            }
        }
    }

    /// A failed write keeps the payload; the next schedule or flush retries
    /// with whatever state is latest by then.
    fn write(&mut self) -> Result<(), HostError> {
        let Some(state) = self.pending.take() else {
            return Ok(());
        };
        let slices: Slices = state
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        let snapshot = PersistedSnapshot::new(self.schema_version, slices);
        match self.persistence.save(snapshot) {
            Ok(()) => {
                tracing::debug!(schema_version = self.schema_version, "snapshot written");
                if let Some(store) = self.store.as_ref().and_then(WeakStore::upgrade) {
                    store.dispatch(hydrate::saved(self.schema_version));
                }
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "snapshot write failed; previous snapshot kept");
                self.pending = Some(state);
                Err(HostError::Storage(err))
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
