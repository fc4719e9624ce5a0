//! Death watching for remote peer handles.
//!
//! Remote handles (ability command proxies, element operators) can vanish
//! when their owning process dies. [`PeerWatcher`] keeps at most one death
//! callback per handle and guarantees it fires at most once, never after an
//! explicit [`PeerWatcher::unwatch`]. Crash cleanup and explicit cleanup
//! race by design; both paths must tolerate running second and finding
//! nothing left to do.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, trace};

/// Stable identity of one remote peer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

type DeathCallback = Box<dyn FnOnce() + Send + 'static>;

/// Registry of peer handles to death callbacks.
#[derive(Default)]
pub struct PeerWatcher {
    watches: Mutex<HashMap<PeerId, DeathCallback>>,
}

impl PeerWatcher {
    pub fn new() -> Self {
        PeerWatcher::default()
    }

    /// Registers the death callback for `peer`, replacing any previous one.
    pub fn watch(&self, peer: PeerId, on_died: impl FnOnce() + Send + 'static) {
        let previous = self
            .watches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer, Box::new(on_died));
        if previous.is_some() {
            debug!(%peer, "replaced existing death watch");
        }
    }

    /// Removes the watch for `peer`. Unwatching an unknown peer is a no-op.
    pub fn unwatch(&self, peer: PeerId) {
        self.watches.lock().unwrap_or_else(|e| e.into_inner()).remove(&peer);
    }

    /// Delivers a death notification. The callback, if any, is consumed
    /// before it runs, so a concurrent unwatch or second notification finds
    /// nothing.
    pub fn notify_died(&self, peer: PeerId) {
        let callback = self.watches.lock().unwrap_or_else(|e| e.into_inner()).remove(&peer);
        match callback {
            Some(callback) => callback(),
            None => trace!(%peer, "death notification for unwatched peer"),
        }
    }

    /// Number of live watches; used by the dump surface.
    pub fn len(&self) -> usize {
        self.watches.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_callback_fires_at_most_once() {
        let watcher = PeerWatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        watcher.watch(PeerId(7), move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        watcher.notify_died(PeerId(7));
        watcher.notify_died(PeerId(7));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unwatch_suppresses_callback() {
        let watcher = PeerWatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        watcher.watch(PeerId(3), move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        watcher.unwatch(PeerId(3));
        watcher.notify_died(PeerId(3));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_watch_replaces_previous_callback() {
        let watcher = PeerWatcher::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let first_clone = first.clone();
        let second_clone = second.clone();

        watcher.watch(PeerId(1), move || {
            first_clone.fetch_add(1, Ordering::SeqCst);
        });
        watcher.watch(PeerId(1), move || {
            second_clone.fetch_add(1, Ordering::SeqCst);
        });
        watcher.notify_died(PeerId(1));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_peer_notification_is_noop() {
        let watcher = PeerWatcher::new();
        watcher.notify_died(PeerId(99));
        assert!(watcher.is_empty());
    }
}
