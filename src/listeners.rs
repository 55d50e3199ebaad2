//! Listener registry shared by the collector, accumulator and session.
//!
//! Notification iterates over a snapshot, so listeners may be added or
//! removed (including from inside a callback) while a notification is in
//! flight.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle returned on registration, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct ListenerSet<L: ?Sized> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(ListenerId, Arc<L>)>>,
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<L>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, listener));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Listeners in registration order at the time of the call.
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.entries
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove() {
        let set: ListenerSet<str> = ListenerSet::new();
        let a = set.add(Arc::from("a"));
        let b = set.add(Arc::from("b"));
        assert_ne!(a, b);
        assert_eq!(set.len(), 2);

        assert!(set.remove(a));
        assert!(!set.remove(a));
        let names: Vec<String> = set.snapshot().iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["b"]);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let set: ListenerSet<str> = ListenerSet::new();
        let id = set.add(Arc::from("a"));
        let snapshot = set.snapshot();
        set.remove(id);
        assert_eq!(snapshot.len(), 1);
        assert!(set.is_empty());
    }
}
