use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::lock;
use crate::host::{EventKind, Listener, ListenerId};

/// Listener registry shared by requests and transactions.
#[derive(Default)]
pub(crate) struct EventListeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(EventKind, ListenerId, Listener)>>,
}

impl EventListeners {
    pub(crate) fn add(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.entries).push((kind, id, listener));
        id
    }

    /// Unknown ids are ignored.
    pub(crate) fn remove(&self, kind: EventKind, id: ListenerId) {
        lock(&self.entries).retain(|(k, i, _)| !(*k == kind && *i == id));
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        lock(&self.entries)
            .iter()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }

    /// Invokes the listeners registered for `kind` at the moment of dispatch.
    /// Listeners may add or remove listeners while running. A panicking
    /// listener is logged and skipped; it never reaches the driver.
    pub(crate) fn dispatch(&self, kind: EventKind) {
        let listeners: Vec<Listener> = lock(&self.entries)
            .iter()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, _, listener)| listener.clone())
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                tracing::error!(event = %kind, "event listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_dispatch_only_matching_kind() {
        let listeners = EventListeners::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        listeners.add(
            EventKind::Success,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        listeners.dispatch(EventKind::Error);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        listeners.dispatch(EventKind::Success);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove() {
        let listeners = EventListeners::default();
        let id = listeners.add(EventKind::Success, Arc::new(|| {}));
        assert_eq!(listeners.count(EventKind::Success), 1);
        listeners.remove(EventKind::Error, id);
        assert_eq!(listeners.count(EventKind::Success), 1);
        listeners.remove(EventKind::Success, id);
        assert_eq!(listeners.count(EventKind::Success), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_dispatch() {
        let listeners = EventListeners::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        listeners.add(EventKind::Success, Arc::new(|| panic!("boom")));
        listeners.add(
            EventKind::Success,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        listeners.dispatch(EventKind::Success);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
