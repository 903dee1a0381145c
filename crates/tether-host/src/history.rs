//! Two-way binding between the routing slice and an external location
//! primitive.
//!
//! Store-originated navigation (`CALL_HISTORY_METHOD`, origin `store`) is
//! pushed onto the primitive; primitive changes come back as
//! `LOCATION_CHANGE` intents with origin `location`. While the binding itself
//! writes to the primitive, the primitive's echo is ignored, and a location
//! equal to the routing slice is never re-dispatched, so neither side loops.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tether_kernel::routing::{self, HistoryCall, HistoryMethod, RoutingState};
use tether_kernel::{Intent, Location, NavAction, Origin, StateTree};

use crate::action::Dispatched;
use crate::store::{Store, Unsubscribe};
use crate::util::isolate;

pub type LocationListener = Arc<dyn Fn(&Location) + Send + Sync>;

/// Receives the pathname of every settled location.
pub type LocationObserver = Arc<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// The external location primitive (browser history, deep-link router, ...).
pub trait LocationSource: Send + Sync {
    fn current(&self) -> Location;
    fn push(&self, location: &Location);
    fn replace(&self, location: &Location);
    fn go(&self, delta: i64);
    /// Register a listener called after every change.
    fn listen(&self, listener: LocationListener) -> Unlisten;
}

/// Removes a location listener when consumed.
#[must_use = "dropping the handle keeps the listener registered"]
pub struct Unlisten(Box<dyn FnOnce() + Send + Sync>);

impl Unlisten {
    pub fn new(remove: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self(Box::new(remove))
    }

    pub fn unlisten(self) {
        (self.0)()
    }
}

impl std::fmt::Debug for Unlisten {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Unlisten")
    }
}

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, LocationListener)>>,
}

impl Listeners {
    fn add(self: &Arc<Self>, listener: LocationListener) -> Unlisten {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, listener));
        let weak: Weak<Self> = Arc::downgrade(self);
        Unlisten::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners.lock().retain(|(entry, _)| *entry != id);
            }
        })
    }

    fn emit(&self, location: &Location) {
        let listeners: Vec<LocationListener> =
            self.lock().iter().map(|(_, listener)| listener.clone()).collect();
        for listener in listeners {
            listener(location);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(u64, LocationListener)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory history stack with the usual push/replace/go semantics.
#[derive(Default)]
pub struct MemoryHistory {
    stack: Mutex<(Vec<Location>, usize)>,
    listeners: Arc<Listeners>,
}

impl MemoryHistory {
    pub fn new(initial: &str) -> Self {
        Self {
            stack: Mutex::new((vec![Location::parse(initial)], 0)),
            listeners: Arc::default(),
        }
    }

    pub fn entries(&self) -> Vec<Location> {
        self.stack().0.clone()
    }

    pub fn index(&self) -> usize {
        self.stack().1
    }

    fn stack(&self) -> std::sync::MutexGuard<'_, (Vec<Location>, usize)> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocationSource for MemoryHistory {
    fn current(&self) -> Location {
        let stack = self.stack();
        stack.0.get(stack.1).cloned().unwrap_or_else(|| Location::parse("/"))
    }

    fn push(&self, location: &Location) {
        let location = location.clone().with_action(NavAction::Push);
        {
            let mut stack = self.stack();
            let index = stack.1;
            stack.0.truncate(index + 1);
            stack.0.push(location.clone());
            stack.1 = stack.0.len() - 1;
        }
        self.listeners.emit(&location);
    }

    fn replace(&self, location: &Location) {
        let location = location.clone().with_action(NavAction::Replace);
        {
            let mut stack = self.stack();
            let index = stack.1;
            match stack.0.get_mut(index) {
                Some(slot) => *slot = location.clone(),
                None => stack.0.push(location.clone()),
            }
        }
        self.listeners.emit(&location);
    }

    fn go(&self, delta: i64) {
        let target = {
            let mut stack = self.stack();
            let last = stack.0.len().saturating_sub(1) as i64;
            let index = (stack.1 as i64 + delta).clamp(0, last) as usize;
            if index == stack.1 {
                return;
            }
            stack.1 = index;
            stack.0[index].clone().with_action(NavAction::Pop)
        };
        self.listeners.emit(&target);
    }

    fn listen(&self, listener: LocationListener) -> Unlisten {
        self.listeners.add(listener)
    }
}

struct SyncShared {
    applying: AtomicBool,
    observer: Option<LocationObserver>,
    listeners: Arc<Listeners>,
}

impl SyncShared {
    fn settled(&self, location: &Location) {
        tracing::debug!(path = %location.href(), "location settled");
        if let Some(observer) = &self.observer {
            isolate("on_location_change", || observer(&location.pathname));
        }
        let listeners: Vec<LocationListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            isolate("history listener", || {
                listener(location);
                Ok(())
            });
        }
    }
}

/// The history handed to the application: navigation goes through the store,
/// reads come from the routing slice.
pub struct SyncedHistory {
    store: Store,
    source: Arc<dyn LocationSource>,
    shared: Arc<SyncShared>,
    store_subscription: Option<Unsubscribe>,
    source_listener: Option<Unlisten>,
}

impl std::fmt::Debug for SyncedHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedHistory")
            .field("location", &self.location())
            .finish()
    }
}

impl SyncedHistory {
    /// Bind `source` to `store` and dispatch the primitive's current location.
    pub fn bind(
        store: &Store,
        source: Arc<dyn LocationSource>,
        observer: Option<LocationObserver>,
    ) -> Self {
        let shared = Arc::new(SyncShared {
            applying: AtomicBool::new(false),
            observer,
            listeners: Arc::default(),
        });

        let store_subscription = {
            let shared = shared.clone();
            let source = source.clone();
            store.subscribe(Arc::new(move |intent: &Intent, state: &Arc<StateTree>| {
                on_store_intent(&shared, source.as_ref(), intent, state)
            }))
        };

        let source_listener = {
            let shared = shared.clone();
            let weak = store.downgrade();
            source.listen(Arc::new(move |location: &Location| {
                if shared.applying.load(Ordering::SeqCst) {
                    return;
                }
                let Some(store) = weak.upgrade() else {
                    return;
                };
                if routed_location(&store.state()).is_some_and(|current| current.same_place(location)) {
                    return;
                }
                store.dispatch(routing::location_change(location, Origin::Location));
            }))
        };

        let initial = source.current();
        store.dispatch(routing::location_change(&initial, Origin::Location));

        Self {
            store: store.clone(),
            source,
            shared,
            store_subscription: Some(store_subscription),
            source_listener: Some(source_listener),
        }
    }

    /// The routing slice's location.
    pub fn location(&self) -> Option<Location> {
        routed_location(&self.store.state())
    }

    pub fn push(&self, path: &str) -> Dispatched {
        self.store.dispatch(routing::push(path))
    }

    pub fn replace(&self, path: &str) -> Dispatched {
        self.store.dispatch(routing::replace(path))
    }

    pub fn go(&self, delta: i64) -> Dispatched {
        self.store.dispatch(routing::go(delta))
    }

    pub fn back(&self) -> Dispatched {
        self.go(-1)
    }

    pub fn forward(&self) -> Dispatched {
        self.go(1)
    }

    /// Call `listener` with every settled location until the handle is used.
    pub fn listen(&self, listener: impl Fn(&Location) + Send + Sync + 'static) -> Unlisten {
        self.shared.listeners.add(Arc::new(listener))
    }

    pub fn source(&self) -> &Arc<dyn LocationSource> {
        &self.source
    }
}

impl Drop for SyncedHistory {
    fn drop(&mut self) {
        if let Some(subscription) = self.store_subscription.take() {
            subscription.unsubscribe();
        }
        if let Some(listener) = self.source_listener.take() {
            listener.unlisten();
        }
    }
}

fn routed_location(state: &StateTree) -> Option<Location> {
    match state.slice::<RoutingState>(routing::SLICE) {
        Ok(routing) => routing.and_then(|routing| routing.location),
        Err(err) => {
            tracing::warn!(error = %err, "routing slice did not decode");
            None
        }
    }
}

fn on_store_intent(shared: &SyncShared, source: &dyn LocationSource, intent: &Intent, state: &StateTree) {
    if intent.is(routing::LOCATION_CHANGE) {
        if let Some(location) = routed_location(state) {
            shared.settled(&location);
        }
        return;
    }
    if !intent.is(routing::CALL_HISTORY_METHOD) || intent.origin() != Some(Origin::Store) {
        return;
    }
    let call: HistoryCall = match intent.decode() {
        Ok(call) => call,
        Err(err) => {
            tracing::warn!(error = %err, "malformed history call");
            return;
        }
    };
    match (call.method, call.location) {
        (HistoryMethod::Go, _) => {
            // The primitive reports the new entry through its listener.
            source.go(call.delta.unwrap_or(0));
        }
        (method, Some(location)) => {
            shared.applying.store(true, Ordering::SeqCst);
            match method {
                HistoryMethod::Replace => source.replace(&location),
                _ => source.push(&location),
            }
            shared.applying.store(false, Ordering::SeqCst);
            shared.settled(&location);
        }
        (_, None) => tracing::warn!("history call without a location"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_history_push_truncates_forward_entries() {
        let history = MemoryHistory::new("/");
        history.push(&Location::parse("/a"));
        history.push(&Location::parse("/b"));
        history.go(-2);
        assert_eq!(history.current().pathname, "/");
        history.push(&Location::parse("/c"));
        let paths: Vec<_> = history.entries().into_iter().map(|l| l.pathname).collect();
        assert_eq!(paths, vec!["/", "/c"]);
    }

    #[test]
    fn go_out_of_range_is_clamped_and_silent_when_unchanged() {
        let history = MemoryHistory::new("/");
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let _listener = history.listen(Arc::new(move |_: &Location| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        history.go(-5);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        history.push(&Location::parse("/a"));
        history.go(-5);
        assert_eq!(history.index(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unlisten_stops_notifications() {
        let history = MemoryHistory::new("/");
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let listener = history.listen(Arc::new(move |_: &Location| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        history.push(&Location::parse("/a"));
        listener.unlisten();
        history.push(&Location::parse("/b"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
