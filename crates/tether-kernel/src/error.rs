use thiserror::Error;

use crate::intent::TransactionId;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("transaction '{0}' not found")]
    TransactionNotFound(TransactionId),
    #[error("transaction '{0}' is already pending")]
    DuplicateTransaction(TransactionId),
    #[error("intent '{kind}' carries an optimistic marker without a transaction id")]
    MissingTransactionId { kind: String },
    #[error("slice '{0}' registered twice")]
    DuplicateSlice(String),
    #[error("invalid offline allow-list entry '{entry}': {reason}")]
    InvalidAllowList { entry: String, reason: String },
    #[error("failed to decode slice '{slice}': {source}")]
    SliceDecode {
        slice: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode payload of '{kind}': {source}")]
    PayloadDecode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}
