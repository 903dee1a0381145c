//! What travels through the dispatch pipeline.
//!
//! Plain intents are values the kernel can reduce. A pending operation pairs
//! an intent with a future that has not resolved yet; the optimistic stage
//! turns it into begin/commit/revert intents.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_kernel::{Intent, StateTree, TransactionId};
use tokio::sync::oneshot;

/// Failure of a pending operation. Travels as the payload of revert intents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct OperationError {
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

pub type OperationResult = Result<Value, OperationError>;
pub type OperationFuture = BoxFuture<'static, OperationResult>;

/// An intent whose outcome is still being computed.
///
/// `intent.payload` is the optimistic result applied at begin. Its
/// `meta.transactionId`, when set, is used as the transaction id.
pub struct PendingOperation {
    pub intent: Intent,
    pub future: OperationFuture,
}

impl PendingOperation {
    pub fn new<F>(intent: Intent, future: F) -> Self
    where
        F: Future<Output = OperationResult> + Send + 'static,
    {
        Self {
            intent,
            future: Box::pin(future),
        }
    }
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("intent", &self.intent)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Action {
    Intent(Intent),
    Operation(PendingOperation),
}

impl Action {
    /// The intent carried by the action, for stages that only inspect it.
    pub fn intent(&self) -> &Intent {
        match self {
            Action::Intent(intent) => intent,
            Action::Operation(op) => &op.intent,
        }
    }

    pub fn kind(&self) -> &str {
        &self.intent().kind
    }

    pub fn is_operation(&self) -> bool {
        matches!(self, Action::Operation(_))
    }
}

impl From<Intent> for Action {
    fn from(intent: Intent) -> Self {
        Action::Intent(intent)
    }
}

impl From<PendingOperation> for Action {
    fn from(op: PendingOperation) -> Self {
        Action::Operation(op)
    }
}

/// Outcome of a dispatch as seen by the caller.
#[derive(Debug)]
pub enum Dispatched {
    /// The intent reached the reducers; carries the new optimistic state.
    Applied(Arc<StateTree>),
    /// Held in the offline queue under this sequence number.
    Queued { sequence: u64 },
    /// A stage swallowed the action.
    Dropped { reason: String },
    /// Begin was applied; the settlement resolves after commit or revert.
    Pending(Settlement),
}

impl Dispatched {
    pub fn state(&self) -> Option<&Arc<StateTree>> {
        match self {
            Dispatched::Applied(state) => Some(state),
            _ => None,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Dispatched::Queued { .. })
    }

    pub fn into_settlement(self) -> Option<Settlement> {
        match self {
            Dispatched::Pending(settlement) => Some(settlement),
            _ => None,
        }
    }
}

/// Handle on the outcome of a pending operation.
#[derive(Debug)]
pub struct Settlement {
    transaction: TransactionId,
    rx: oneshot::Receiver<OperationResult>,
}

impl Settlement {
    pub(crate) fn channel(transaction: TransactionId) -> (oneshot::Sender<OperationResult>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { transaction, rx })
    }

    pub fn transaction(&self) -> &TransactionId {
        &self.transaction
    }

    /// Resolves once the commit or revert intent has been applied.
    pub async fn settled(self) -> OperationResult {
        self.rx
            .await
            .unwrap_or_else(|_| Err(OperationError::new("operation was abandoned before settling")))
    }
}
