//! Live connection registry.
//!
//! Maps an authenticated identity to the outbound queue of its current
//! relay connection. At most one connection is registered per identity;
//! registering again replaces the previous entry.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Sending half of one live connection.
///
/// Cheap to clone. Two handles are the same connection iff their ids match.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: mpsc::Sender<String>,
}

/// Why a frame could not be queued on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Outbound queue is full; the connection is alive but slow.
    #[error("outbound queue full")]
    Full,
    /// The connection's writer has gone away.
    #[error("connection closed")]
    Closed,
}

impl ConnectionHandle {
    /// Wrap an outbound queue, assigning a fresh connection id.
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a text frame without waiting.
    pub fn try_send(&self, frame: String) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

/// Concurrent identity → connection map.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` for `identity`.
    ///
    /// Returns the handle it replaced, if any. The replaced connection is
    /// left open; it simply stops receiving routed frames.
    pub fn register(&self, identity: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.connections.insert(identity.to_string(), handle);
        if let Some(prev) = &previous {
            tracing::debug!(
                "Connection {} for {} superseded by a newer connection",
                prev.id,
                identity
            );
        }
        previous
    }

    /// Current connection for `identity`.
    pub fn lookup(&self, identity: &str) -> Option<ConnectionHandle> {
        self.connections.get(identity).map(|entry| entry.value().clone())
    }

    /// Remove `identity` only if it still maps to `handle`.
    ///
    /// A connection that has been superseded can never evict its
    /// replacement. Returns whether an entry was removed.
    pub fn deregister(&self, identity: &str, handle: &ConnectionHandle) -> bool {
        self.connections
            .remove_if(identity, |_, current| current.id == handle.id)
            .is_some()
    }

    /// Number of registered identities.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no identity is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Registration that removes itself from the registry when dropped.
///
/// Held by a session for as long as its connection lives, so the entry is
/// cleaned up on every exit path.
#[derive(Debug)]
pub struct Registration {
    registry: ConnectionRegistry,
    identity: String,
    handle: ConnectionHandle,
}

impl Registration {
    /// Register `handle` for `identity` and return the guard.
    pub fn new(registry: ConnectionRegistry, identity: String, handle: ConnectionHandle) -> Self {
        registry.register(&identity, handle.clone());
        Self {
            registry,
            identity,
            handle,
        }
    }

    /// The registered handle.
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.deregister(&self.identity, &self.handle) {
            tracing::debug!("Deregistered connection {} for {}", self.handle.id, self.identity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(4);
        (ConnectionHandle::new(tx), rx)
    }

    #[test]
    fn register_then_lookup() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle();

        assert!(registry.register("bob", h.clone()).is_none());
        assert_eq!(registry.lookup("bob").unwrap().id(), h.id());
        assert!(registry.lookup("alice").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn last_registration_wins() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = handle();
        let (second, _rx2) = handle();

        registry.register("bob", first.clone());
        let replaced = registry.register("bob", second.clone()).unwrap();
        assert_eq!(replaced.id(), first.id());
        assert_eq!(registry.lookup("bob").unwrap().id(), second.id());
    }

    #[test]
    fn stale_deregister_keeps_newer_connection() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = handle();
        let (second, _rx2) = handle();

        registry.register("bob", first.clone());
        registry.register("bob", second.clone());

        assert!(!registry.deregister("bob", &first));
        assert_eq!(registry.lookup("bob").unwrap().id(), second.id());

        assert!(registry.deregister("bob", &second));
        assert!(registry.is_empty());
    }

    #[test]
    fn registration_guard_deregisters_on_drop() {
        let registry = ConnectionRegistry::new();
        let (h, _rx) = handle();

        let guard = Registration::new(registry.clone(), "alice".to_string(), h);
        assert!(registry.lookup("alice").is_some());

        drop(guard);
        assert!(registry.lookup("alice").is_none());
    }

    #[test]
    fn try_send_reports_full_and_closed() {
        let (tx, rx) = mpsc::channel(1);
        let h = ConnectionHandle::new(tx);

        assert_eq!(h.try_send("one".to_string()), Ok(()));
        assert_eq!(h.try_send("two".to_string()), Err(SendError::Full));

        drop(rx);
        assert_eq!(h.try_send("three".to_string()), Err(SendError::Closed));
    }

    #[test]
    fn connection_ids_are_unique() {
        let (a, _rx1) = handle();
        let (b, _rx2) = handle();
        assert_ne!(a.id(), b.id());
    }
}
