//! Connectivity as an injected capability.

use std::sync::Arc;

use tokio::sync::watch;

/// Source of the "network reachable" signal. The receiver's current value is
/// the connectivity at subscription time.
pub trait Connectivity: Send + Sync {
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity driven by hand; used by tests and by hosts that learn about
/// the network from elsewhere.
#[derive(Clone)]
pub struct ManualConnectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ManualConnectivity {
    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repeated_values_do_not_wake_subscribers() {
        let connectivity = ManualConnectivity::new(true);
        let mut rx = connectivity.subscribe();
        connectivity.set_online(true);
        assert!(!rx.has_changed().unwrap());
        connectivity.set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
    }
}
