//! Routing slice: the single source of truth for the current location.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::intent::{Intent, Origin};
use crate::reducer::SliceReducer;

pub const SLICE: &str = "routing";

pub const LOCATION_CHANGE: &str = "@@router/LOCATION_CHANGE";
pub const CALL_HISTORY_METHOD: &str = "@@router/CALL_HISTORY_METHOD";

/// Navigation-internal kinds; excluded from persistence by default.
pub const NAVIGATION_KINDS: &[&str] = &[LOCATION_CHANGE, CALL_HISTORY_METHOD];

pub fn is_navigation(kind: &str) -> bool {
    NAVIGATION_KINDS.contains(&kind)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NavAction {
    Push,
    Replace,
    #[default]
    Pop,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub pathname: String,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub action: NavAction,
}

impl Location {
    /// Parse `"/path?query#hash"`. A missing leading slash is added.
    pub fn parse(path: &str) -> Self {
        let (rest, hash) = match path.find('#') {
            Some(index) => (&path[..index], &path[index..]),
            None => (path, ""),
        };
        let (pathname, search) = match rest.find('?') {
            Some(index) => (&rest[..index], &rest[index..]),
            None => (rest, ""),
        };
        let pathname = if pathname.starts_with('/') {
            pathname.to_string()
        } else {
            format!("/{pathname}")
        };
        Self {
            pathname,
            search: if search == "?" { String::new() } else { search.to_string() },
            hash: if hash == "#" { String::new() } else { hash.to_string() },
            action: NavAction::Pop,
        }
    }

    /// Parse the fragment of a hash-routed URL (`"#/path?query"`). No state key
    /// is read from the query.
    pub fn from_hash(fragment: &str) -> Self {
        Self::parse(fragment.strip_prefix('#').unwrap_or(fragment))
    }

    pub fn with_action(mut self, action: NavAction) -> Self {
        self.action = action;
        self
    }

    pub fn href(&self) -> String {
        format!("{}{}{}", self.pathname, self.search, self.hash)
    }

    /// Decoded query pairs in order of appearance; later keys win.
    pub fn query(&self) -> IndexMap<String, String> {
        self.search
            .trim_start_matches('?')
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect()
    }

    /// Same place, ignoring how we got there.
    pub fn same_place(&self, other: &Location) -> bool {
        self.pathname == other.pathname && self.search == other.search && self.hash == other.hash
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMethod {
    Push,
    Replace,
    Go,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryCall {
    pub method: HistoryMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingState {
    #[serde(default)]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingReducer;

impl SliceReducer for RoutingReducer {
    type State = RoutingState;

    fn handles(&self, intent: &Intent) -> bool {
        is_navigation(&intent.kind)
    }

    fn reduce(&self, mut state: RoutingState, intent: &Intent) -> RoutingState {
        match intent.kind.as_str() {
            LOCATION_CHANGE => match intent.decode::<LocationPayload>() {
                Ok(payload) => state.location = Some(payload.location),
                Err(err) => log::warn!("{err}"),
            },
            CALL_HISTORY_METHOD => match intent.decode::<HistoryCall>() {
                Ok(HistoryCall {
                    method: HistoryMethod::Push,
                    location: Some(location),
                    ..
                }) => state.location = Some(location.with_action(NavAction::Push)),
                Ok(HistoryCall {
                    method: HistoryMethod::Replace,
                    location: Some(location),
                    ..
                }) => state.location = Some(location.with_action(NavAction::Replace)),
                // `go` settles through a LOCATION_CHANGE from the primitive.
                Ok(_) => {}
                Err(err) => log::warn!("{err}"),
            },
            _ => {}
        }
        state
    }
}

#[derive(Debug, Deserialize)]
struct LocationPayload {
    location: Location,
}

/// A location observed on (or initialised from) the external primitive.
pub fn location_change(location: &Location, origin: Origin) -> Intent {
    Intent::new(LOCATION_CHANGE, json!({ "location": location })).with_origin(origin)
}

pub fn push(path: &str) -> Intent {
    history_call(HistoryCall {
        method: HistoryMethod::Push,
        location: Some(Location::parse(path).with_action(NavAction::Push)),
        delta: None,
    })
}

pub fn replace(path: &str) -> Intent {
    history_call(HistoryCall {
        method: HistoryMethod::Replace,
        location: Some(Location::parse(path).with_action(NavAction::Replace)),
        delta: None,
    })
}

pub fn go(delta: i64) -> Intent {
    history_call(HistoryCall {
        method: HistoryMethod::Go,
        location: None,
        delta: Some(delta),
    })
}

fn history_call(call: HistoryCall) -> Intent {
    Intent::new(CALL_HISTORY_METHOD, serde_json::to_value(call).unwrap_or_default())
        .with_origin(Origin::Store)
}
