use std::sync::Arc;

use async_trait::async_trait;
use tether_kernel::RequestSpec;

use crate::action::{Action, Dispatched, OperationResult, PendingOperation};
use crate::pipeline::{Middleware, Next, StageKind};
use crate::store::Store;

/// Performs the server call described by an intent's request descriptor.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: RequestSpec) -> OperationResult;
}

/// Turns intents carrying `meta.request` into pending operations. The intent
/// payload becomes the optimistic result.
pub struct RequestStage {
    transport: Option<Arc<dyn Transport>>,
}

impl RequestStage {
    pub fn new(transport: Option<Arc<dyn Transport>>) -> Self {
        Self { transport }
    }
}

impl Middleware for RequestStage {
    fn stage(&self) -> StageKind {
        StageKind::Request
    }

    fn name(&self) -> &str {
        "request"
    }

    fn handle(&self, _store: &Store, action: Action, next: Next<'_>) -> Dispatched {
        let intent = match action {
            Action::Intent(intent) if intent.phase().is_none() => intent,
            other => return next(other),
        };
        let Some(request) = intent.meta.request.clone() else {
            return next(Action::Intent(intent));
        };
        let Some(transport) = self.transport.clone() else {
            tracing::debug!(kind = %intent.kind, endpoint = %request.endpoint, "no transport configured; request descriptor ignored");
            return next(Action::Intent(intent));
        };
        let operation = PendingOperation::new(intent, async move { transport.send(request).await });
        next(Action::Operation(operation))
    }
}
