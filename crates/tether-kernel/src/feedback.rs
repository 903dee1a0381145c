//! Transient notifications. Never persisted; the reducer only sees absolute
//! times carried on intents so it stays pure.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::intent::Intent;
use crate::reducer::SliceReducer;

pub const SLICE: &str = "feedback";

/// Request a notice; the host assigns the id and expiry.
pub const NOTIFY: &str = "@@feedback/NOTIFY";
pub const SHOW: &str = "@@feedback/SHOW";
pub const DISMISS: &str = "@@feedback/DISMISS";
pub const EXPIRE: &str = "@@feedback/EXPIRE";

pub const DEFAULT_MAX_NOTICES: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: u64,
    pub level: Level,
    pub message: String,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl Notice {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_ms)
    }
}

/// Payload of a `NOTIFY` intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    #[serde(default)]
    pub level: Level,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

/// Messages shown when an operation carrying these hooks settles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackHooks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackState {
    #[serde(default)]
    pub notices: Vec<Notice>,
}

impl FeedbackState {
    /// Notices still visible at `now_ms`; expired ones are filtered lazily.
    pub fn active(&self, now_ms: u64) -> impl Iterator<Item = &Notice> {
        self.notices.iter().filter(move |notice| !notice.is_expired(now_ms))
    }

    fn prune(&mut self, now_ms: u64) {
        self.notices.retain(|notice| !notice.is_expired(now_ms));
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShowPayload {
    notice: Notice,
    now: u64,
}

#[derive(Debug, Deserialize)]
struct DismissPayload {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct ExpirePayload {
    now: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct FeedbackReducer {
    max_notices: usize,
}

impl FeedbackReducer {
    pub fn new(max_notices: usize) -> Self {
        Self {
            max_notices: max_notices.max(1),
        }
    }
}

impl Default for FeedbackReducer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NOTICES)
    }
}

impl SliceReducer for FeedbackReducer {
    type State = FeedbackState;

    fn handles(&self, intent: &Intent) -> bool {
        matches!(intent.kind.as_str(), SHOW | DISMISS | EXPIRE)
    }

    fn reduce(&self, mut state: FeedbackState, intent: &Intent) -> FeedbackState {
        match intent.kind.as_str() {
            SHOW => match intent.decode::<ShowPayload>() {
                Ok(ShowPayload { notice, now }) => {
                    state.prune(now);
                    state.notices.push(notice);
                    let overflow = state.notices.len().saturating_sub(self.max_notices);
                    state.notices.drain(..overflow);
                }
                Err(err) => log::warn!("{err}"),
            },
            DISMISS => match intent.decode::<DismissPayload>() {
                Ok(DismissPayload { id }) => state.notices.retain(|notice| notice.id != id),
                Err(err) => log::warn!("{err}"),
            },
            EXPIRE => match intent.decode::<ExpirePayload>() {
                Ok(ExpirePayload { now }) => state.prune(now),
                Err(err) => log::warn!("{err}"),
            },
            _ => {}
        }
        state
    }
}

pub fn notify(level: Level, message: impl Into<String>) -> Intent {
    notify_for(level, message, None)
}

pub fn notify_for(level: Level, message: impl Into<String>, ttl_ms: Option<u64>) -> Intent {
    let request = NotifyRequest {
        level,
        message: message.into(),
        ttl_ms,
    };
    Intent::new(NOTIFY, serde_json::to_value(request).unwrap_or_default())
}

pub fn show(notice: &Notice, now_ms: u64) -> Intent {
    Intent::new(SHOW, json!({ "notice": notice, "now": now_ms }))
}

pub fn dismiss(id: u64) -> Intent {
    Intent::new(DISMISS, json!({ "id": id }))
}

pub fn expire(now_ms: u64) -> Intent {
    Intent::new(EXPIRE, json!({ "now": now_ms }))
}
