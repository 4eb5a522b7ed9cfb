//! Typed observables and subscription handles.
//!
//! A [`ChangesObservable`] pairs one shared watch-target state with the
//! target's filter predicate. Attaching an observer registers a listener on
//! the shared state and returns a [`Subscription`]; closing the subscription
//! removes the listener, and removing the last listener for a target tears
//! the target down (best-effort `unwatch`, state dropped from the table).

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::NimbusLinkError;
use crate::models::{DatabaseChange, DocumentChange, IndexChange, OperationStatusChange};
use crate::state::{DatabaseConnectionState, Listener};

/// A notification payload kind that can be projected out of
/// [`DatabaseChange`].
pub trait ChangeNotification: Send + Sync + 'static {
    /// Return the payload when `change` carries this kind.
    fn project(change: &DatabaseChange) -> Option<&Self>;
}

impl ChangeNotification for DocumentChange {
    fn project(change: &DatabaseChange) -> Option<&Self> {
        match change {
            DatabaseChange::Document(value) => Some(value),
            _ => None,
        }
    }
}

impl ChangeNotification for IndexChange {
    fn project(change: &DatabaseChange) -> Option<&Self> {
        match change {
            DatabaseChange::Index(value) => Some(value),
            _ => None,
        }
    }
}

impl ChangeNotification for OperationStatusChange {
    fn project(change: &DatabaseChange) -> Option<&Self> {
        match change {
            DatabaseChange::OperationStatus(value) => Some(value),
            _ => None,
        }
    }
}

/// Receives change notifications and broadcast errors for one subscription.
///
/// Delivery is push-based: errors arrive through [`on_error`], never as a
/// return value from delivery itself.
///
/// [`on_error`]: ChangesObserver::on_error
pub trait ChangesObserver<T>: Send + Sync {
    /// A notification passed the target filter.
    fn on_change(&self, change: &T);

    /// A connection- or server-level error was broadcast to this target.
    fn on_error(&self, _error: &NimbusLinkError) {}
}

struct FnObserver<T, F> {
    on_change: F,
    _marker: PhantomData<fn(&T)>,
}

impl<T, F> ChangesObserver<T> for FnObserver<T, F>
where
    T: Send + Sync,
    F: Fn(&T) + Send + Sync,
{
    fn on_change(&self, change: &T) {
        (self.on_change)(change);
    }
}

/// Teardown hook installed by the client; fired when a target's last
/// listener unsubscribes.
pub(crate) type StateTeardown = Arc<dyn Fn(Arc<DatabaseConnectionState>) + Send + Sync>;

/// A typed view over one watch target.
///
/// Returned by the `for_*` methods on [`DatabaseChanges`]; cheap to clone.
///
/// [`DatabaseChanges`]: crate::DatabaseChanges
#[derive(Clone)]
pub struct ChangesObservable<T> {
    state: Arc<DatabaseConnectionState>,
    filter: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    teardown: StateTeardown,
}

impl<T: ChangeNotification> ChangesObservable<T> {
    pub(crate) fn new(
        state: Arc<DatabaseConnectionState>,
        filter: Arc<dyn Fn(&T) -> bool + Send + Sync>,
        teardown: StateTeardown,
    ) -> Self {
        Self { state, filter, teardown }
    }

    /// Attach an observer; notifications matching the target filter are
    /// pushed to it until the returned [`Subscription`] is closed.
    pub fn subscribe(&self, observer: impl ChangesObserver<T> + 'static) -> Subscription {
        self.subscribe_arc(Arc::new(observer))
    }

    /// Attach a closure invoked for every matching notification.
    pub fn subscribe_fn(&self, on_change: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.subscribe(FnObserver { on_change, _marker: PhantomData })
    }

    /// Attach a shared observer.
    pub fn subscribe_arc(&self, observer: Arc<dyn ChangesObserver<T>>) -> Subscription {
        let filter = self.filter.clone();
        let change_observer = observer.clone();
        let listener_id = self.state.add_listener(Listener {
            on_change: Box::new(move |change| {
                if let Some(payload) = T::project(change) {
                    if filter(payload) {
                        change_observer.on_change(payload);
                    }
                }
            }),
            on_error: Box::new(move |error| observer.on_error(error)),
        });

        Subscription {
            state: self.state.clone(),
            teardown: self.teardown.clone(),
            listener_id,
            closed: AtomicBool::new(false),
        }
    }

    /// The most recent error observed for this target, if any.
    pub fn last_error(&self) -> Option<Arc<NimbusLinkError>> {
        self.state.last_error()
    }
}

/// Handle for one attached observer.
///
/// Closing (or dropping) the handle deregisters the observer. When it was
/// the target's last observer, the target itself is torn down: an `unwatch`
/// is sent best-effort and the state leaves the client's table.
pub struct Subscription {
    state: Arc<DatabaseConnectionState>,
    teardown: StateTeardown,
    listener_id: u64,
    closed: AtomicBool,
}

impl Subscription {
    /// Stop receiving notifications. Safe to call multiple times.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.state.remove_listener(self.listener_id) {
            (self.teardown)(self.state.clone());
        }
    }

    /// Returns `true` once [`close`](Subscription::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
