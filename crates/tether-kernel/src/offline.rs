//! Offline queue slice and its connectivity state machine.
//!
//! ```text
//! Online --OFFLINE--> Offline --ONLINE--> Draining --queue empty--> Online
//!                        ^                   |  \
//!                        +-----OFFLINE-------+   +--retryable failure--> Paused
//! ```
//!
//! `Paused` keeps the failed entry at the head and waits for the next
//! connectivity transition. Replaying entries is the host's job; this module
//! only records what happened.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::KernelError;
use crate::intent::Intent;
use crate::is_reserved_kind;
use crate::reducer::SliceReducer;

pub const SLICE: &str = "offlineQueue";

pub const ONLINE: &str = "@@offline/ONLINE";
pub const OFFLINE: &str = "@@offline/OFFLINE";
pub const QUEUE: &str = "@@offline/QUEUE";
pub const ACK: &str = "@@offline/ACK";
pub const REPLAY_FAILED: &str = "@@offline/REPLAY_FAILED";
pub const DRAINED: &str = "@@offline/DRAINED";
pub const RESET: &str = "@@offline/RESET";

/// Fields of the slice that survive restarts.
pub const PERSISTED_FIELDS: &[&str] = &["queue", "nextSequence"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    #[default]
    Online,
    Offline,
    Draining,
    Paused,
}

impl QueueStatus {
    pub fn is_connected(self) -> bool {
        !matches!(self, QueueStatus::Offline)
    }

    fn on_online(self, queued: usize) -> QueueStatus {
        match self {
            QueueStatus::Draining => QueueStatus::Draining,
            _ if queued == 0 => QueueStatus::Online,
            _ => QueueStatus::Draining,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub sequence: u64,
    pub intent: Intent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFailure {
    pub sequence: u64,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueState {
    #[serde(default)]
    pub status: QueueStatus,
    #[serde(default)]
    pub queue: Vec<QueueEntry>,
    #[serde(default)]
    pub next_sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ReplayFailure>,
}

impl OfflineQueueState {
    pub fn head(&self) -> Option<&QueueEntry> {
        self.queue.first()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn enqueue(&mut self, intent: Intent) {
        let after_last = self.queue.last().map(|entry| entry.sequence + 1).unwrap_or(0);
        let sequence = self.next_sequence.max(after_last);
        self.next_sequence = sequence + 1;
        self.queue.push(QueueEntry { sequence, intent });
    }

    fn remove(&mut self, sequence: u64) -> bool {
        match self.queue.iter().position(|entry| entry.sequence == sequence) {
            Some(index) => {
                if index != 0 {
                    log::warn!("offline queue entry {sequence} removed out of order");
                }
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    fn settle_drain(&mut self) {
        if self.status == QueueStatus::Draining && self.queue.is_empty() {
            self.status = QueueStatus::Online;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineQueueReducer;

impl SliceReducer for OfflineQueueReducer {
    type State = OfflineQueueState;

    fn handles(&self, intent: &Intent) -> bool {
        intent.kind.starts_with("@@offline/")
    }

    fn reduce(&self, mut state: OfflineQueueState, intent: &Intent) -> OfflineQueueState {
        match intent.kind.as_str() {
            ONLINE => state.status = state.status.on_online(state.queue.len()),
            OFFLINE => state.status = QueueStatus::Offline,
            QUEUE => match intent.decode::<Intent>() {
                Ok(queued) => state.enqueue(queued),
                Err(err) => log::warn!("{err}"),
            },
            ACK => match intent.decode::<SequenceRef>() {
                Ok(SequenceRef { sequence }) => {
                    if !state.remove(sequence) {
                        log::warn!("acknowledged unknown offline queue entry {sequence}");
                    }
                    if state.last_error.as_ref().is_some_and(|e| e.sequence == sequence) {
                        state.last_error = None;
                    }
                    state.settle_drain();
                }
                Err(err) => log::warn!("{err}"),
            },
            REPLAY_FAILED => match intent.decode::<ReplayFailure>() {
                Ok(failure) => {
                    if failure.retryable {
                        if state.status == QueueStatus::Draining {
                            state.status = QueueStatus::Paused;
                        }
                    } else {
                        state.remove(failure.sequence);
                        state.settle_drain();
                    }
                    state.last_error = Some(failure);
                }
                Err(err) => log::warn!("{err}"),
            },
            DRAINED => {
                if state.status == QueueStatus::Draining {
                    state.status = if state.queue.is_empty() {
                        QueueStatus::Online
                    } else {
                        QueueStatus::Paused
                    };
                }
            }
            RESET => {
                state.queue.clear();
                state.last_error = None;
                state.settle_drain();
            }
            _ => {}
        }
        state
    }
}

#[derive(Debug, Deserialize)]
struct SequenceRef {
    sequence: u64,
}

pub fn online() -> Intent {
    Intent::bare(ONLINE)
}

pub fn offline() -> Intent {
    Intent::bare(OFFLINE)
}

pub fn queue(intent: &Intent) -> Intent {
    Intent::new(QUEUE, serde_json::to_value(intent).unwrap_or_default())
}

pub fn ack(sequence: u64) -> Intent {
    Intent::new(ACK, json!({ "sequence": sequence }))
}

pub fn replay_failed(failure: &ReplayFailure) -> Intent {
    Intent::new(REPLAY_FAILED, serde_json::to_value(failure).unwrap_or_default())
}

pub fn drained() -> Intent {
    Intent::bare(DRAINED)
}

pub fn reset() -> Intent {
    Intent::bare(RESET)
}

/// Intent kinds that may be held back while disconnected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowList(BTreeSet<String>);

impl AllowList {
    pub fn new<I, S>(kinds: I) -> Result<Self, KernelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = Self(kinds.into_iter().map(Into::into).collect());
        list.validate()?;
        Ok(list)
    }

    pub fn validate(&self) -> Result<(), KernelError> {
        for entry in &self.0 {
            if entry.trim().is_empty() {
                return Err(KernelError::InvalidAllowList {
                    entry: entry.clone(),
                    reason: "empty intent kind".into(),
                });
            }
            if is_reserved_kind(entry) {
                return Err(KernelError::InvalidAllowList {
                    entry: entry.clone(),
                    reason: "kind is reserved for built-in slices".into(),
                });
            }
        }
        Ok(())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.0.contains(kind)
    }

    /// Whether `intent` may be queued: listed kind or explicit flag, never a
    /// built-in intent, never an optimistic phase intent, never a replay.
    pub fn admits(&self, intent: &Intent) -> bool {
        if is_reserved_kind(&intent.kind) || intent.phase().is_some() || intent.is_replay() {
            return false;
        }
        self.contains(&intent.kind) || intent.meta.queue_if_offline
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Phase;

    fn reduce(state: OfflineQueueState, intent: &Intent) -> OfflineQueueState {
        OfflineQueueReducer.reduce(state, intent)
    }

    fn offline_with(kinds: &[&str]) -> OfflineQueueState {
        let mut state = reduce(OfflineQueueState::default(), &offline());
        for kind in kinds {
            state = reduce(state, &queue(&Intent::bare(*kind)));
        }
        state
    }

    #[test]
    fn queue_assigns_monotonic_sequences() {
        let state = offline_with(&["a", "b", "c"]);
        let sequences: Vec<_> = state.queue.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(state.next_sequence, 3);
        assert_eq!(state.head().unwrap().intent.kind, "a");
    }

    #[test]
    fn online_with_entries_starts_draining() {
        let state = reduce(offline_with(&["a"]), &online());
        assert_eq!(state.status, QueueStatus::Draining);

        let empty = reduce(offline_with(&[]), &online());
        assert_eq!(empty.status, QueueStatus::Online);
    }

    #[test]
    fn acks_remove_head_and_finish_drain() {
        let mut state = reduce(offline_with(&["a", "b"]), &online());
        state = reduce(state, &ack(0));
        assert_eq!(state.status, QueueStatus::Draining);
        assert_eq!(state.len(), 1);
        state = reduce(state, &ack(1));
        assert_eq!(state.status, QueueStatus::Online);
        assert!(state.is_empty());
        assert_eq!(state.next_sequence, 2);
    }

    #[test]
    fn retryable_failure_pauses_and_keeps_entry() {
        let mut state = reduce(offline_with(&["a", "b"]), &online());
        state = reduce(
            state,
            &replay_failed(&ReplayFailure {
                sequence: 0,
                message: "timeout".into(),
                retryable: true,
            }),
        );
        assert_eq!(state.status, QueueStatus::Paused);
        assert_eq!(state.head().unwrap().sequence, 0);
        assert_eq!(state.last_error.as_ref().unwrap().message, "timeout");

        state = reduce(state, &offline());
        state = reduce(state, &online());
        assert_eq!(state.status, QueueStatus::Draining);
    }

    #[test]
    fn fatal_failure_drops_entry() {
        let mut state = reduce(offline_with(&["a", "b"]), &online());
        state = reduce(
            state,
            &replay_failed(&ReplayFailure {
                sequence: 0,
                message: "rejected".into(),
                retryable: false,
            }),
        );
        assert_eq!(state.status, QueueStatus::Draining);
        assert_eq!(state.head().unwrap().sequence, 1);
    }

    #[test]
    fn disconnect_mid_drain_keeps_remainder() {
        let mut state = reduce(offline_with(&["a", "b", "c"]), &online());
        state = reduce(state, &ack(0));
        state = reduce(state, &offline());
        assert_eq!(state.status, QueueStatus::Offline);
        let kinds: Vec<_> = state.queue.iter().map(|e| e.intent.kind.as_str()).collect();
        assert_eq!(kinds, vec!["b", "c"]);
    }

    #[test]
    fn sequences_continue_after_restored_queue() {
        let mut state = OfflineQueueState {
            status: QueueStatus::Offline,
            queue: vec![QueueEntry {
                sequence: 9,
                intent: Intent::bare("a"),
            }],
            next_sequence: 0,
            last_error: None,
        };
        state = reduce(state, &queue(&Intent::bare("b")));
        assert_eq!(state.queue[1].sequence, 10);
    }

    #[test]
    fn allow_list_admission() {
        let list = AllowList::new(["todo/add"]).unwrap();
        assert!(list.admits(&Intent::bare("todo/add")));
        assert!(!list.admits(&Intent::bare("todo/remove")));
        assert!(list.admits(&Intent::bare("todo/remove").queue_if_offline()));
        assert!(!list.admits(&Intent::bare("todo/add").with_replay(3)));
        assert!(!list.admits(
            &Intent::bare("todo/add")
                .with_transaction("t")
                .with_phase(Phase::Commit)
        ));
        assert!(!list.admits(&Intent::bare(ONLINE).queue_if_offline()));
    }

    #[test]
    fn allow_list_rejects_reserved_and_empty_kinds() {
        assert!(matches!(
            AllowList::new(["@@router/LOCATION_CHANGE"]),
            Err(KernelError::InvalidAllowList { .. })
        ));
        assert!(matches!(
            AllowList::new([" "]),
            Err(KernelError::InvalidAllowList { .. })
        ));
    }
}
