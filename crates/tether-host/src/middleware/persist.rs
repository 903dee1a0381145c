use std::collections::HashSet;

use tether_kernel::{Intent, Phase, hydrate};

use crate::action::{Action, Dispatched};
use crate::debounce::DebouncedWriter;
use crate::pipeline::{Middleware, Next, StageKind};
use crate::store::Store;

/// Schedules a debounced write of the confirmed state after each applied
/// intent. Tentative (begin) results are never written.
pub struct PersistStage {
    writer: DebouncedWriter,
    blacklist: HashSet<String>,
}

impl PersistStage {
    pub fn new(writer: DebouncedWriter, blacklist: impl IntoIterator<Item = String>) -> Self {
        Self {
            writer,
            blacklist: blacklist.into_iter().collect(),
        }
    }

    fn triggers_save(&self, intent: &Intent) -> bool {
        !intent.is(hydrate::LOAD)
            && !intent.is(hydrate::SAVE)
            && !self.blacklist.contains(&intent.kind)
            && intent.phase() != Some(Phase::Begin)
    }
}

impl Middleware for PersistStage {
    fn stage(&self) -> StageKind {
        StageKind::Persistence
    }

    fn name(&self) -> &str {
        "persistence"
    }

    fn handle(&self, store: &Store, action: Action, next: Next<'_>) -> Dispatched {
        let trigger = match &action {
            Action::Intent(intent) => self.triggers_save(intent),
            // Its begin and settle intents come back through as plain intents.
            Action::Operation(_) => false,
        };
        let result = next(action);
        if trigger && matches!(result, Dispatched::Applied(_)) {
            self.writer.schedule_from(store, store.confirmed_state());
        }
        result
    }
}
