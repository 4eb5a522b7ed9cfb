//! Connection lifecycle handler registries.
//!
//! The client exposes two process-wide callback surfaces:
//!
//! - connection-status-changed handlers, fired whenever the client flips
//!   between connected and disconnected (and one final time on close)
//! - error handlers, fired for every broadcast connection or server error
//!
//! Both are backed by [`HandlerRegistry`], a removable listener set keyed by
//! the [`HandlerId`] returned at registration time. Removing a handler frees
//! its slot; long-lived processes do not accumulate dead entries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::NimbusLinkError;

/// Handle returned by `add`; pass it back to `remove` to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Callback fired on every connection-status transition.
pub type ConnectionStatusHandler = dyn Fn() + Send + Sync;

/// Callback fired for every broadcast error.
pub type ErrorHandler = dyn Fn(&NimbusLinkError) + Send + Sync;

/// A removable set of shared callbacks.
///
/// Invocation snapshots the set under the lock and calls the handlers
/// outside it, so a handler may add or remove handlers without deadlocking.
pub(crate) struct HandlerRegistry<T: ?Sized> {
    handlers: Mutex<HashMap<u64, Arc<T>>>,
    next_id: AtomicU64,
}

impl<T: ?Sized> Default for HandlerRegistry<T> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T: ?Sized> HandlerRegistry<T> {
    /// Register a handler and return its removal id.
    pub(crate) fn add(&self, handler: Arc<T>) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .expect("handler registry lock poisoned")
            .insert(id, handler);
        HandlerId(id)
    }

    /// Remove a handler. Removing an unknown or already-removed id is a no-op.
    pub(crate) fn remove(&self, id: HandlerId) {
        self.handlers
            .lock()
            .expect("handler registry lock poisoned")
            .remove(&id.0);
    }

    /// Snapshot the registered handlers for invocation outside the lock.
    pub(crate) fn snapshot(&self) -> Vec<Arc<T>> {
        self.handlers
            .lock()
            .expect("handler registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.handlers.lock().expect("handler registry lock poisoned").len()
    }
}

impl HandlerRegistry<ConnectionStatusHandler> {
    /// Fire every registered status handler.
    pub(crate) fn invoke(&self) {
        for handler in self.snapshot() {
            handler();
        }
    }
}

impl HandlerRegistry<ErrorHandler> {
    /// Fire every registered error handler with the given error.
    pub(crate) fn invoke(&self, error: &NimbusLinkError) {
        for handler in self.snapshot() {
            handler(error);
        }
    }
}
