//! Connectivity tracking.
//!
//! The monitor only reflects the host's reachability signal. It does no
//! polling of its own; whoever owns the platform hook calls `set_online`.
//! Every network operation in the engine checks `ensure_online` first.

use std::sync::Arc;

use tokio::sync::watch;

use crate::pool::FetchError;

/// Connectivity transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Online,
    Offline,
}

/// Shared connectivity state. Cloning yields another handle to the same state.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    /// Create a monitor with the given initial connectivity.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Current connectivity
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record the host's reachability signal.
    ///
    /// Returns the transition event when connectivity actually changed.
    pub fn set_online(&self, online: bool) -> Option<NetworkEvent> {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if !changed {
            return None;
        }

        let event = if online { NetworkEvent::Online } else { NetworkEvent::Offline };
        tracing::info!(event = ?event, "Connectivity changed");
        Some(event)
    }

    /// Subscribe to connectivity changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Gate for network operations: fails fast with `FetchError::Offline`.
    pub fn ensure_online(&self) -> Result<(), FetchError> {
        if self.is_online() { Ok(()) } else { Err(FetchError::Offline) }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
