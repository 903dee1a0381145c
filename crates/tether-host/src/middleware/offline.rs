//! Offline queue stage.
//!
//! While disconnected, eligible intents are turned into `@@offline/QUEUE`
//! intents and never reach the rest of the pipeline. When connectivity returns
//! a single drain task replays the queue head through the full pipeline,
//! waits for the replay to settle, acknowledges it, and moves on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tether_kernel::offline::{self, OfflineQueueState, QueueStatus, ReplayFailure};
use tether_kernel::{AllowList, Intent, KernelError};

use crate::action::{Action, Dispatched, OperationError};
use crate::config::{OfflineOptions, ReplayFailurePolicy, ReplayOrdering};
use crate::pipeline::{Middleware, Next, StageKind};
use crate::store::Store;

pub struct OfflineStage {
    allow_list: AllowList,
    ordering: ReplayOrdering,
    failure_policy: ReplayFailurePolicy,
    draining: Arc<AtomicBool>,
}

impl OfflineStage {
    pub fn new(options: &OfflineOptions) -> Result<Self, KernelError> {
        Ok(Self {
            allow_list: AllowList::new(options.allow_list.iter().cloned())?,
            ordering: options.ordering,
            failure_policy: options.failure_policy,
            draining: Arc::new(AtomicBool::new(false)),
        })
    }

    fn should_hold(&self, queue: &OfflineQueueState) -> bool {
        match queue.status {
            QueueStatus::Offline => true,
            _ => self.ordering == ReplayOrdering::Strict && !queue.is_empty(),
        }
    }

    fn hold(&self, intent: Intent, next: Next<'_>) -> Dispatched {
        tracing::info!(kind = %intent.kind, "holding intent in offline queue");
        match next(Action::Intent(offline::queue(&intent))) {
            Dispatched::Applied(state) => {
                let sequence = state
                    .slice::<OfflineQueueState>(offline::SLICE)
                    .ok()
                    .flatten()
                    .and_then(|queue| queue.queue.last().map(|entry| entry.sequence));
                match sequence {
                    Some(sequence) => Dispatched::Queued { sequence },
                    None => Dispatched::Dropped {
                        reason: "offline queue slice is not registered".into(),
                    },
                }
            }
            other => other,
        }
    }

    fn start_drain(&self, store: &Store) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        let flag = self.draining.clone();
        let policy = self.failure_policy;
        let task_store = store.clone();
        store.spawn(async move {
            loop {
                drain(&task_store, policy).await;
                flag.store(false, Ordering::SeqCst);
                // An ONLINE that landed while this task was finishing found the
                // flag set and did not start a task of its own.
                if task_store.offline_queue().status != QueueStatus::Draining
                    || flag.swap(true, Ordering::SeqCst)
                {
                    break;
                }
            }
        });
    }
}

impl Middleware for OfflineStage {
    fn stage(&self) -> StageKind {
        StageKind::Offline
    }

    fn name(&self) -> &str {
        "offline"
    }

    fn handle(&self, store: &Store, action: Action, next: Next<'_>) -> Dispatched {
        let intent = match action {
            Action::Intent(intent) => intent,
            // Futures cannot be stored; pending operations always pass.
            operation => return next(operation),
        };
        if intent.is(offline::ONLINE) {
            let result = next(Action::Intent(intent));
            let queue = store.offline_queue();
            tracing::info!(status = ?queue.status, queued = queue.len(), "connectivity restored");
            if queue.status == QueueStatus::Draining {
                self.start_drain(store);
            }
            return result;
        }
        if intent.is(offline::OFFLINE) {
            tracing::info!("connectivity lost");
            return next(Action::Intent(intent));
        }
        if self.allow_list.admits(&intent) && self.should_hold(&store.offline_queue()) {
            return self.hold(intent, next);
        }
        next(Action::Intent(intent))
    }
}

async fn drain(store: &Store, policy: ReplayFailurePolicy) {
    loop {
        let queue = store.offline_queue();
        if queue.status != QueueStatus::Draining {
            tracing::debug!(status = ?queue.status, remaining = queue.len(), "drain stopped");
            return;
        }
        let Some(entry) = queue.head().cloned() else {
            store.dispatch(offline::drained());
            return;
        };
        let sequence = entry.sequence;
        tracing::debug!(sequence, kind = %entry.intent.kind, "replaying queued intent");
        let outcome = match store.dispatch(entry.intent.with_replay(sequence)) {
            Dispatched::Pending(settlement) => settlement.settled().await.map(|_| ()),
            Dispatched::Dropped { reason } => Err(OperationError::new(reason)),
            _ => Ok(()),
        };
        match outcome {
            Ok(()) => {
                store.dispatch(offline::ack(sequence));
            }
            Err(error) => {
                let retryable = policy.retryable(&error);
                tracing::warn!(sequence, retryable, error = %error, "replay failed");
                store.dispatch(offline::replay_failed(&ReplayFailure {
                    sequence,
                    message: error.message,
                    retryable,
                }));
                if retryable {
                    return;
                }
            }
        }
    }
}
