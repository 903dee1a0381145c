//! UI-adjacent helpers. Each one only talks to the store through dispatch
//! and state reads, so applications pick the ones they render.

use tether_kernel::Intent;
use tether_kernel::feedback::{self, FeedbackState, Level, Notice};
use tether_kernel::offline::{self, QueueStatus};
use tokio::task::JoinHandle;

use crate::connectivity::Connectivity;
use crate::store::Store;
use crate::util::now_ms;

/// Forwards connectivity changes into the store as offline queue intents.
/// Dropping the binding stops forwarding.
#[derive(Debug)]
pub struct ConnectivityBinding {
    task: JoinHandle<()>,
}

impl ConnectivityBinding {
    /// Dispatch the current connectivity, then every change.
    pub fn bind(store: &Store, connectivity: &dyn Connectivity) -> Self {
        let mut rx = connectivity.subscribe();
        let mut last = *rx.borrow_and_update();
        store.dispatch(transition(last));

        let weak = store.downgrade();
        let task = store.spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online == last {
                    continue;
                }
                last = online;
                if weak.dispatch(transition(online)).is_err() {
                    break;
                }
            }
        });
        Self { task }
    }
}

impl Drop for ConnectivityBinding {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn transition(online: bool) -> Intent {
    if online { offline::online() } else { offline::offline() }
}

/// Status banner text for the offline queue, if one should be shown.
pub fn connectivity_banner(store: &Store) -> Option<String> {
    let queue = store.offline_queue();
    match queue.status {
        QueueStatus::Online => None,
        QueueStatus::Offline if queue.is_empty() => Some("Offline".into()),
        QueueStatus::Offline => Some(format!("Offline, {} change(s) waiting", queue.len())),
        QueueStatus::Draining => Some(format!("Syncing {} change(s)", queue.len())),
        QueueStatus::Paused => Some(match &queue.last_error {
            Some(failure) => format!("Sync paused: {}", failure.message),
            None => "Sync paused".into(),
        }),
    }
}

/// Read side of the feedback slice.
#[derive(Debug, Clone)]
pub struct ToastView {
    store: Store,
}

impl ToastView {
    pub fn new(store: &Store) -> Self {
        Self {
            store: store.clone(),
        }
    }

    /// Notices still visible now, oldest first.
    pub fn notices(&self) -> Vec<Notice> {
        self.notices_at(now_ms())
    }

    pub fn notices_at(&self, now: u64) -> Vec<Notice> {
        match self.store.slice::<FeedbackState>(feedback::SLICE) {
            Ok(Some(state)) => state.active(now).cloned().collect(),
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::warn!(error = %err, "feedback slice did not decode");
                Vec::new()
            }
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.notices()
            .iter()
            .map(|notice| format!("[{}] {}", label(notice.level), notice.message))
            .collect()
    }

    pub fn notify(&self, level: Level, message: impl Into<String>) {
        self.store.dispatch(feedback::notify(level, message));
    }

    pub fn dismiss(&self, id: u64) {
        self.store.dispatch(feedback::dismiss(id));
    }
}

fn label(level: Level) -> &'static str {
    match level {
        Level::Info => "info",
        Level::Success => "success",
        Level::Warning => "warning",
        Level::Error => "error",
    }
}
