use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tether_kernel::feedback::{self, Level, Notice, NotifyRequest};
use tether_kernel::{Intent, Phase};

use crate::action::{Action, Dispatched};
use crate::config::FeedbackOptions;
use crate::pipeline::{Middleware, Next, StageKind};
use crate::store::Store;
use crate::util::now_ms;

/// Turns notify requests into notices and reacts to feedback hooks on
/// settled operations.
pub struct FeedbackStage {
    options: FeedbackOptions,
    next_id: AtomicU64,
}

impl FeedbackStage {
    pub fn new(options: FeedbackOptions) -> Self {
        Self {
            options,
            next_id: AtomicU64::new(1),
        }
    }

    fn notice(&self, request: NotifyRequest, now: u64) -> Notice {
        let ttl = request
            .ttl_ms
            .map(Duration::from_millis)
            .or(self.options.default_ttl);
        Notice {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            level: request.level,
            message: request.message,
            expires_at: ttl.map(|ttl| now + ttl.as_millis() as u64),
        }
    }

    fn show(&self, store: &Store, intent: &Intent, next: Next<'_>) -> Dispatched {
        let request: NotifyRequest = match intent.decode() {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "malformed notify request");
                return Dispatched::Dropped {
                    reason: err.to_string(),
                };
            }
        };
        let now = now_ms();
        let notice = self.notice(request, now);
        let result = next(Action::Intent(feedback::show(&notice, now)));
        if self.options.auto_expire {
            if let Some(at) = notice.expires_at {
                schedule_expiry(store, at, Duration::from_millis(at.saturating_sub(now)));
            }
        }
        result
    }
}

impl Middleware for FeedbackStage {
    fn stage(&self) -> StageKind {
        StageKind::Feedback
    }

    fn name(&self) -> &str {
        "feedback"
    }

    fn handle(&self, store: &Store, action: Action, next: Next<'_>) -> Dispatched {
        if let Action::Intent(intent) = &action {
            if intent.is(feedback::NOTIFY) {
                return self.show(store, intent, next);
            }
        }
        let hook = match &action {
            Action::Intent(intent) => intent.meta.feedback.as_ref().and_then(|hooks| {
                match intent.phase() {
                    Some(Phase::Commit) => hooks.success.clone().map(|m| (Level::Success, m)),
                    Some(Phase::Revert) => hooks.failure.clone().map(|m| (Level::Error, m)),
                    _ => None,
                }
            }),
            Action::Operation(_) => None,
        };
        let result = next(action);
        if let (Some((level, message)), Dispatched::Applied(_)) = (hook, &result) {
            store.dispatch(feedback::notify(level, message));
        }
        result
    }
}

fn schedule_expiry(store: &Store, at: u64, after: Duration) {
    let weak = store.downgrade();
    store.spawn(async move {
        tokio::time::sleep(after).await;
        if let Some(store) = weak.upgrade() {
            store.dispatch(feedback::expire(at));
        }
    });
}
