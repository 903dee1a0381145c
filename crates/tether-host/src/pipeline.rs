//! The ordered chain of interceptors every dispatched action passes through.
//!
//! Each stage sees the action before every stage after it and can forward it
//! (`next`), replace it, or short-circuit. The chain ends at the store's
//! reducer call. Order is an explicit, validated list of [`StageKind`]s.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::action::{Action, Dispatched};
use crate::error::InitError;
use crate::store::Store;

pub type Next<'a> = &'a dyn Fn(Action) -> Dispatched;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Queues allow-listed intents while disconnected and replays them.
    Offline,
    Logger,
    /// Schedules debounced durable writes.
    Persistence,
    /// Slot where application middlewares run, in registration order.
    Extras,
    Feedback,
    /// Turns request descriptors into pending operations.
    Request,
    /// Turns pending operations into begin/commit/revert intents.
    Optimistic,
}

pub const CANONICAL_ORDER: &[StageKind] = &[
    StageKind::Offline,
    StageKind::Logger,
    StageKind::Persistence,
    StageKind::Extras,
    StageKind::Feedback,
    StageKind::Request,
    StageKind::Optimistic,
];

/// `(before, after)` pairs that every stage list must respect when both
/// stages are present.
pub const ORDER_CONSTRAINTS: &[(StageKind, StageKind)] = &[
    (StageKind::Offline, StageKind::Persistence),
    (StageKind::Offline, StageKind::Request),
    (StageKind::Offline, StageKind::Optimistic),
    (StageKind::Request, StageKind::Optimistic),
];

pub const REQUIRED_STAGES: &[StageKind] = &[StageKind::Optimistic];

pub trait Middleware: Send + Sync {
    fn stage(&self) -> StageKind;

    fn name(&self) -> &str {
        "middleware"
    }

    fn handle(&self, store: &Store, action: Action, next: Next<'_>) -> Dispatched;
}

pub fn validate_order(order: &[StageKind]) -> Result<(), InitError> {
    for (index, kind) in order.iter().enumerate() {
        if order[..index].contains(kind) {
            return Err(InitError::DuplicateStage(*kind));
        }
    }
    for required in REQUIRED_STAGES {
        if !order.contains(required) {
            return Err(InitError::MissingStage(*required));
        }
    }
    let position = |kind: StageKind| order.iter().position(|k| *k == kind);
    for (before, after) in ORDER_CONSTRAINTS {
        if let (Some(b), Some(a)) = (position(*before), position(*after)) {
            if b > a {
                return Err(InitError::StageOrder {
                    before: *before,
                    after: *after,
                });
            }
        }
    }
    Ok(())
}

#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|stage| stage.name()))
            .finish()
    }
}

impl Pipeline {
    /// Lay out the built-in stages along `order`. Built-ins missing from
    /// `builtins` (disabled features) are skipped; extras fill the `Extras` slot.
    pub fn assemble(
        order: &[StageKind],
        builtins: Vec<Arc<dyn Middleware>>,
        extras: Vec<Arc<dyn Middleware>>,
    ) -> Result<Self, InitError> {
        validate_order(order)?;
        if let Some(extra) = extras.first() {
            if !order.contains(&StageKind::Extras) {
                return Err(InitError::NoExtrasSlot(extra.name().to_string()));
            }
        }
        let mut stages = Vec::with_capacity(builtins.len() + extras.len());
        for kind in order {
            if *kind == StageKind::Extras {
                stages.extend(extras.iter().cloned());
                continue;
            }
            match builtins.iter().find(|stage| stage.stage() == *kind) {
                Some(stage) => stages.push(stage.clone()),
                None => tracing::debug!(stage = ?kind, "stage disabled"),
            }
        }
        Ok(Self { stages })
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub(crate) fn run(
        &self,
        store: &Store,
        action: Action,
        base: &dyn Fn(Action) -> Dispatched,
    ) -> Dispatched {
        self.run_from(0, store, action, base)
    }

    fn run_from(
        &self,
        index: usize,
        store: &Store,
        action: Action,
        base: &dyn Fn(Action) -> Dispatched,
    ) -> Dispatched {
        match self.stages.get(index) {
            Some(stage) => stage.handle(store, action, &|action| {
                self.run_from(index + 1, store, action, base)
            }),
            None => base(action),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_is_valid() {
        validate_order(CANONICAL_ORDER).unwrap();
    }

    #[test]
    fn persistence_before_offline_is_rejected() {
        let order = [StageKind::Persistence, StageKind::Offline, StageKind::Optimistic];
        assert!(matches!(
            validate_order(&order),
            Err(InitError::StageOrder {
                before: StageKind::Offline,
                after: StageKind::Persistence
            })
        ));
    }

    #[test]
    fn request_after_optimistic_is_rejected() {
        let order = [StageKind::Optimistic, StageKind::Request];
        assert!(matches!(
            validate_order(&order),
            Err(InitError::StageOrder {
                before: StageKind::Request,
                after: StageKind::Optimistic
            })
        ));
    }

    #[test]
    fn duplicates_and_missing_optimistic_are_rejected() {
        assert!(matches!(
            validate_order(&[StageKind::Logger, StageKind::Logger, StageKind::Optimistic]),
            Err(InitError::DuplicateStage(StageKind::Logger))
        ));
        assert!(matches!(
            validate_order(&[StageKind::Offline]),
            Err(InitError::MissingStage(StageKind::Optimistic))
        ));
    }

    #[test]
    fn optional_stages_may_be_omitted() {
        validate_order(&[StageKind::Feedback, StageKind::Optimistic]).unwrap();
    }
}
