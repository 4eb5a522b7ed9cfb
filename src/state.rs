//! Per-watch-target subscription state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::NimbusLinkError;
use crate::models::DatabaseChange;

/// Erased listener callbacks held by a [`DatabaseConnectionState`].
pub(crate) struct Listener {
    /// Kind projection + target filter + observer, fused by the observable.
    pub(crate) on_change: Box<dyn Fn(&DatabaseChange) + Send + Sync>,
    /// Error forwarding to the observer.
    pub(crate) on_error: Box<dyn Fn(&NimbusLinkError) + Send + Sync>,
}

/// Shared record of interest in one watch target.
///
/// Created lazily the first time a target is observed and torn down when the
/// last listener for the target unsubscribes. Any number of observables may
/// share one state; each carries its own filter, so the state fans every
/// inbound notification out to all listeners and the filters decide final
/// delivery.
pub struct DatabaseConnectionState {
    key: String,
    watch_command: String,
    unwatch_command: String,
    value: String,
    listeners: Mutex<HashMap<u64, Arc<Listener>>>,
    next_listener_id: AtomicU64,
    last_error: Mutex<Option<Arc<NimbusLinkError>>>,
}

impl DatabaseConnectionState {
    pub(crate) fn new(
        key: String,
        watch_command: &str,
        unwatch_command: &str,
        value: String,
    ) -> Self {
        Self {
            key,
            watch_command: watch_command.to_string(),
            unwatch_command: unwatch_command.to_string(),
            value,
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            last_error: Mutex::new(None),
        }
    }

    /// The state-table key, e.g. `collections/Orders`.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn watch_command(&self) -> &str {
        &self.watch_command
    }

    pub(crate) fn unwatch_command(&self) -> &str {
        &self.unwatch_command
    }

    pub(crate) fn value(&self) -> &str {
        &self.value
    }

    /// Register a listener; returns the id used to remove it.
    pub(crate) fn add_listener(&self, listener: Listener) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .insert(id, Arc::new(listener));
        id
    }

    /// Remove a listener. Returns `true` when this removal emptied the set,
    /// which is the caller's cue to tear the state down.
    pub(crate) fn remove_listener(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock().expect("listener lock poisoned");
        listeners.remove(&id);
        listeners.is_empty()
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().expect("listener lock poisoned").len()
    }

    /// Deliver a notification to every listener.
    ///
    /// The set is snapshotted under the lock and the callbacks run outside
    /// it, so a callback may subscribe or unsubscribe without deadlocking.
    pub(crate) fn dispatch(&self, change: &DatabaseChange) {
        let snapshot: Vec<Arc<Listener>> = self
            .listeners
            .lock()
            .expect("listener lock poisoned")
            .values()
            .cloned()
            .collect();
        for listener in snapshot {
            (listener.on_change)(change);
        }
    }

    /// Record the error and forward it to every listener's error callback.
    pub(crate) fn fail(&self, error: Arc<NimbusLinkError>) {
        *self.last_error.lock().expect("last-error lock poisoned") = Some(error.clone());
        let snapshot: Vec<Arc<Listener>> = self
            .listeners
            .lock()
            .expect("listener lock poisoned")
            .values()
            .cloned()
            .collect();
        for listener in snapshot {
            (listener.on_error)(&error);
        }
    }

    /// The most recent error observed for this target, if any.
    pub fn last_error(&self) -> Option<Arc<NimbusLinkError>> {
        self.last_error.lock().expect("last-error lock poisoned").clone()
    }

    /// Drop all listeners; called when the state leaves the table.
    pub(crate) fn clear(&self) {
        self.listeners.lock().expect("listener lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentChange, DocumentChangeKind};
    use std::sync::atomic::AtomicUsize;

    fn put_change(id: &str) -> DatabaseChange {
        DatabaseChange::Document(DocumentChange {
            kind: DocumentChangeKind::Put,
            id: id.to_string(),
            collection_name: "Orders".to_string(),
            type_name: String::new(),
            change_vector: None,
        })
    }

    fn counting_listener(calls: Arc<AtomicUsize>) -> Listener {
        Listener {
            on_change: Box::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            }),
            on_error: Box::new(|_| {}),
        }
    }

    #[test]
    fn test_dispatch_reaches_every_listener() {
        let state = DatabaseConnectionState::new(
            "all-docs".to_string(),
            "watch-docs",
            "unwatch-docs",
            String::new(),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        state.add_listener(counting_listener(calls.clone()));
        state.add_listener(counting_listener(calls.clone()));

        state.dispatch(&put_change("orders/1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_listener_reports_last_removal() {
        let state = DatabaseConnectionState::new(
            "docs/orders/1".to_string(),
            "watch-doc",
            "unwatch-doc",
            "orders/1".to_string(),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let first = state.add_listener(counting_listener(calls.clone()));
        let second = state.add_listener(counting_listener(calls));

        assert!(!state.remove_listener(first));
        assert!(state.remove_listener(second));
        assert_eq!(state.listener_count(), 0);
    }

    #[test]
    fn test_fail_records_last_error_and_notifies() {
        let state = DatabaseConnectionState::new(
            "all-docs".to_string(),
            "watch-docs",
            "unwatch-docs",
            String::new(),
        );
        let errors = Arc::new(AtomicUsize::new(0));
        let errors_clone = errors.clone();
        state.add_listener(Listener {
            on_change: Box::new(|_| {}),
            on_error: Box::new(move |_| {
                errors_clone.fetch_add(1, Ordering::SeqCst);
            }),
        });

        state.fail(Arc::new(NimbusLinkError::WebSocket("lost".to_string())));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(state.last_error().is_some());
    }
}
