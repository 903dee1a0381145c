//! Pending operation adapter.
//!
//! A pending operation becomes a begin intent, applied before `handle`
//! returns, and exactly one commit or revert intent dispatched through the
//! whole pipeline once its future settles. All three keep the original kind.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tether_kernel::{Phase, TransactionId};

use crate::action::{Action, Dispatched, OperationError, PendingOperation, Settlement};
use crate::pipeline::{Middleware, Next, StageKind};
use crate::store::Store;

#[derive(Debug, Default)]
pub struct OptimisticStage;

impl Middleware for OptimisticStage {
    fn stage(&self) -> StageKind {
        StageKind::Optimistic
    }

    fn name(&self) -> &str {
        "optimistic"
    }

    fn handle(&self, store: &Store, action: Action, next: Next<'_>) -> Dispatched {
        let PendingOperation { intent, future } = match action {
            Action::Operation(op) => op,
            intent => return next(intent),
        };
        let id = intent
            .transaction_id()
            .cloned()
            .unwrap_or_else(TransactionId::generate);
        let base = intent.with_transaction(id.clone());

        match next(Action::Intent(base.clone().with_phase(Phase::Begin))) {
            Dispatched::Applied(_) => {}
            other => {
                tracing::warn!(transaction = %id, "begin was not applied; operation not started");
                return other;
            }
        }

        let (tx, settlement) = Settlement::channel(id.clone());
        let task_store = store.clone();
        store.spawn(async move {
            let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::error!(transaction = %id, "operation panicked; reverting");
                    Err(OperationError::new("operation panicked"))
                }
            };
            let settle = match &outcome {
                Ok(value) => base.with_payload(value.clone()).with_phase(Phase::Commit),
                Err(error) => base
                    .with_payload(serde_json::to_value(error).unwrap_or_default())
                    .with_phase(Phase::Revert)
                    .as_error(),
            };
            task_store.dispatch(settle);
            let _ = tx.send(outcome);
        });
        Dispatched::Pending(settlement)
    }
}
