//! Optimistic concurrency over the combined reducer.
//!
//! The manager keeps two projections of the state tree:
//!
//! - `confirmed`: every plain intent, every committed transaction (its begin
//!   intent followed by its commit intent), and every revert intent.
//! - `optimistic`: `confirmed` with the begin intents of all still-pending
//!   transactions folded on top, in begin order.
//!
//! The optimistic projection is always recomputed from `confirmed`, never
//! patched, so settling transactions in any order cannot leave stale
//! contributions behind.

use std::sync::Arc;

use crate::error::KernelError;
use crate::intent::{Intent, Phase, TransactionId};
use crate::reducer::{CombinedReducer, StateTree};

/// Drops every pending transaction.
pub const RESET: &str = "@@optimist/RESET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Committed,
    Reverted,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    /// The begin intent whose reducer output is applied tentatively.
    pub begin: Intent,
    /// Position in begin order; strictly increasing across the manager's lifetime.
    pub order: u64,
    pub status: TransactionStatus,
}

/// What applying an intent did to the manager.
#[derive(Debug)]
pub enum Transition {
    Plain,
    Began(TransactionId),
    Committed(TransactionId),
    Reverted(TransactionId),
    Reset { dropped: usize },
    /// The intent was not applied; the error explains why.
    Ignored(KernelError),
}

#[derive(Debug)]
pub struct OptimisticManager {
    reducer: CombinedReducer,
    confirmed: Arc<StateTree>,
    optimistic: Arc<StateTree>,
    pending: Vec<Transaction>,
    next_order: u64,
}

impl OptimisticManager {
    pub fn new(reducer: CombinedReducer) -> Self {
        let initial = Arc::new(reducer.initial_state());
        Self {
            reducer,
            confirmed: initial.clone(),
            optimistic: initial,
            pending: Vec::new(),
            next_order: 0,
        }
    }

    pub fn reducer(&self) -> &CombinedReducer {
        &self.reducer
    }

    /// State including tentative results; what readers should render.
    pub fn optimistic(&self) -> Arc<StateTree> {
        self.optimistic.clone()
    }

    /// State without any pending transaction; what is safe to persist.
    pub fn confirmed(&self) -> Arc<StateTree> {
        self.confirmed.clone()
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn is_pending(&self, id: &TransactionId) -> bool {
        self.position(id).is_some()
    }

    /// Route an intent by its optimistic marker.
    pub fn apply(&mut self, intent: &Intent) -> Transition {
        let Some(phase) = intent.phase() else {
            if intent.is(RESET) {
                let dropped = self.reset();
                return Transition::Reset { dropped };
            }
            self.apply_plain(intent);
            return Transition::Plain;
        };
        let Some(id) = intent.transaction_id().cloned() else {
            let err = KernelError::MissingTransactionId {
                kind: intent.kind.clone(),
            };
            log::warn!("{err}");
            return Transition::Ignored(err);
        };
        let result = match phase {
            Phase::Begin => self.begin_transaction(id.clone(), intent).map(|_| Transition::Began(id)),
            Phase::Commit => self
                .commit_transaction(&id, intent)
                .map(|_| Transition::Committed(id)),
            Phase::Revert => self
                .revert_transaction(&id, Some(intent))
                .map(|_| Transition::Reverted(id)),
        };
        match result {
            Ok(transition) => transition,
            Err(err) => {
                log::warn!("ignoring '{}': {err}", intent.kind);
                Transition::Ignored(err)
            }
        }
    }

    /// Apply `intent` tentatively on top of the current optimistic projection.
    pub fn begin_transaction(
        &mut self,
        id: TransactionId,
        intent: &Intent,
    ) -> Result<Arc<StateTree>, KernelError> {
        if self.is_pending(&id) {
            return Err(KernelError::DuplicateTransaction(id));
        }
        let order = self.next_order;
        self.next_order += 1;
        self.optimistic = Arc::new(self.reducer.reduce(&self.optimistic, intent));
        self.pending.push(Transaction {
            id,
            begin: intent.clone(),
            order,
            status: TransactionStatus::Pending,
        });
        Ok(self.optimistic.clone())
    }

    /// Fold the transaction's begin intent, then the commit intent, into the
    /// confirmed baseline.
    pub fn commit_transaction(
        &mut self,
        id: &TransactionId,
        intent: &Intent,
    ) -> Result<Arc<StateTree>, KernelError> {
        let mut tx = self.take(id)?;
        tx.status = TransactionStatus::Committed;
        let tentative = self.reducer.reduce(&self.confirmed, &tx.begin);
        self.confirmed = Arc::new(self.reducer.reduce(&tentative, intent));
        self.recompute();
        Ok(self.optimistic.clone())
    }

    /// Drop the transaction's tentative contribution. When a revert intent is
    /// given it is applied to the baseline so reducers can record the failure.
    pub fn revert_transaction(
        &mut self,
        id: &TransactionId,
        intent: Option<&Intent>,
    ) -> Result<Arc<StateTree>, KernelError> {
        let mut tx = self.take(id)?;
        tx.status = TransactionStatus::Reverted;
        if let Some(intent) = intent {
            self.confirmed = Arc::new(self.reducer.reduce(&self.confirmed, intent));
        }
        self.recompute();
        Ok(self.optimistic.clone())
    }

    fn apply_plain(&mut self, intent: &Intent) {
        self.confirmed = Arc::new(self.reducer.reduce(&self.confirmed, intent));
        self.recompute();
    }

    fn reset(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.recompute();
        dropped
    }

    fn position(&self, id: &TransactionId) -> Option<usize> {
        self.pending.iter().position(|tx| &tx.id == id)
    }

    fn take(&mut self, id: &TransactionId) -> Result<Transaction, KernelError> {
        let index = self
            .position(id)
            .ok_or_else(|| KernelError::TransactionNotFound(id.clone()))?;
        Ok(self.pending.remove(index))
    }

    fn recompute(&mut self) {
        if self.pending.is_empty() {
            self.optimistic = self.confirmed.clone();
            return;
        }
        let folded = self
            .pending
            .iter()
            .fold(StateTree::clone(&self.confirmed), |state, tx| {
                self.reducer.reduce(&state, &tx.begin)
            });
        self.optimistic = Arc::new(folded);
    }
}
