use std::time::Instant;

use crate::action::{Action, Dispatched};
use crate::config::LoggerOptions;
use crate::pipeline::{Middleware, Next, StageKind};
use crate::store::Store;
use crate::util::now_ms;

/// Records every action that passes through it. Installed outside
/// production only.
pub struct LoggerStage {
    options: LoggerOptions,
}

impl LoggerStage {
    pub fn new(options: LoggerOptions) -> Self {
        Self { options }
    }
}

impl Middleware for LoggerStage {
    fn stage(&self) -> StageKind {
        StageKind::Logger
    }

    fn name(&self) -> &str {
        "logger"
    }

    fn handle(&self, store: &Store, action: Action, next: Next<'_>) -> Dispatched {
        let kind = action.kind().to_string();
        let phase = action.intent().phase();
        let transaction = action.intent().transaction_id().cloned();
        let operation = action.is_operation();
        let at_ms = self.options.timestamp.then(now_ms);
        let started = self.options.duration.then(Instant::now);
        let before = (!self.options.collapsed).then(|| store.state());

        let result = next(action);

        let elapsed_us = started.map(|t| t.elapsed().as_micros() as u64);
        tracing::debug!(
            target: "tether::action",
            kind = %kind,
            phase = ?phase,
            transaction = ?transaction.as_ref().map(|id| id.as_str()),
            operation,
            outcome = outcome(&result),
            at_ms = ?at_ms,
            elapsed_us = ?elapsed_us,
            "action"
        );
        if let Some(before) = before {
            tracing::trace!(target: "tether::action", kind = %kind, prev = ?before, next = ?store.state());
        }
        result
    }
}

fn outcome(result: &Dispatched) -> &'static str {
    match result {
        Dispatched::Applied(_) => "applied",
        Dispatched::Queued { .. } => "queued",
        Dispatched::Dropped { .. } => "dropped",
        Dispatched::Pending(_) => "pending",
    }
}
