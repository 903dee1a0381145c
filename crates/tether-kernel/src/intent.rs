use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::KernelError;
use crate::feedback::FeedbackHooks;

/// Identifier correlating the begin/commit/revert intents of one optimistic transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Optimistic phase of an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Begin,
    Commit,
    Revert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimisticMarker {
    #[serde(rename = "type")]
    pub phase: Phase,
}

/// Which side of the history binding produced a navigation intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Dispatched by the application; the location primitive must follow.
    Store,
    /// Observed on the location primitive; the store must follow.
    Location,
}

/// Serializable description of a server call, turned into a pending operation
/// by the host's transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    #[serde(default = "RequestSpec::default_method")]
    pub method: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,
}

impl RequestSpec {
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>, body: Value) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
            body,
        }
    }

    fn default_method() -> String {
        "POST".into()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimistic: Option<OptimisticMarker>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub queue_if_offline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    /// Sequence of the offline queue entry this intent is a replay of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackHooks>,
}

impl IntentMeta {
    pub fn is_empty(&self) -> bool {
        *self == IntentMeta::default()
    }
}

/// A dispatched request to change state. Intents are values: once dispatched
/// they are never mutated, derived intents are built with the `with_*` helpers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "IntentMeta::is_empty")]
    pub meta: IntentMeta,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

impl Intent {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            meta: IntentMeta::default(),
            error: false,
        }
    }

    pub fn bare(kind: impl Into<String>) -> Self {
        Self::new(kind, Value::Null)
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_transaction(mut self, id: impl Into<TransactionId>) -> Self {
        self.meta.transaction_id = Some(id.into());
        self
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.meta.optimistic = Some(OptimisticMarker { phase });
        self
    }

    pub fn with_request(mut self, request: RequestSpec) -> Self {
        self.meta.request = Some(request);
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.meta.origin = Some(origin);
        self
    }

    pub fn with_feedback(mut self, hooks: FeedbackHooks) -> Self {
        self.meta.feedback = Some(hooks);
        self
    }

    pub fn with_replay(mut self, sequence: u64) -> Self {
        self.meta.replay = Some(sequence);
        self
    }

    pub fn queue_if_offline(mut self) -> Self {
        self.meta.queue_if_offline = true;
        self
    }

    pub fn as_error(mut self) -> Self {
        self.error = true;
        self
    }

    pub fn phase(&self) -> Option<Phase> {
        self.meta.optimistic.map(|marker| marker.phase)
    }

    pub fn transaction_id(&self) -> Option<&TransactionId> {
        self.meta.transaction_id.as_ref()
    }

    pub fn origin(&self) -> Option<Origin> {
        self.meta.origin
    }

    pub fn is_replay(&self) -> bool {
        self.meta.replay.is_some()
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Decode the payload into a typed structure.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, KernelError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| KernelError::PayloadDecode {
            kind: self.kind.clone(),
            source,
        })
    }
}
