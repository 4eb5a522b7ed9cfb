//! The shared changes connection.
//!
//! [`DatabaseChanges`] owns one persistent WebSocket to a database's
//! `/databases/<db>/changes` endpoint and multiplexes every subscription
//! over it. It handles:
//!
//! - Single connection for all watch targets (no per-subscription sockets)
//! - Command/confirmation correlation by strictly increasing command ids
//! - Automatic reconnection with exponential backoff, until closed
//! - Replay of `watch` commands for every live target after reconnect
//! - Connection lifecycle events (status-changed and error handlers)

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::{SinkExt, StreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

use crate::error::{NimbusLinkError, Result};
use crate::event_handlers::{
    ConnectionStatusHandler, ErrorHandler, HandlerId, HandlerRegistry,
};
use crate::models::{
    CommandEnvelope, ConnectionOptions, DatabaseChange, DocumentChange, IndexChange,
    OperationStatusChange, ServerFrame,
};
use crate::observable::{ChangesObservable, StateTeardown};
use crate::state::DatabaseConnectionState;
use crate::timeouts::NimbusLinkTimeouts;
use crate::topology::EndpointResolver;
use crate::transport::{
    resolve_changes_url, ChangesTransport, WebSocketTransport, WireSink, WireStream,
};

/// RFC 3986 unreserved characters stay literal; everything else is escaped
/// in the `watch-type` parameter.
const TYPE_NAME_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Mutable state guarded by the single writer lock.
///
/// Command-id assignment, the pending-confirmation table, the watch-target
/// table, and the socket's write half all live behind one lock so that ids
/// are assigned in write order and a target registered concurrently with a
/// reconnect gets its `watch` sent exactly once. The lock is never held
/// across a confirmation wait.
struct Shared {
    writer: Option<WireSink>,
    command_id: u64,
    confirmations: HashMap<u64, oneshot::Sender<()>>,
    states: HashMap<String, Arc<DatabaseConnectionState>>,
}

struct ChangesInner {
    database: String,
    resolver: Arc<dyn EndpointResolver>,
    transport: Arc<dyn ChangesTransport>,
    timeouts: NimbusLinkTimeouts,
    options: ConnectionOptions,
    shared: Mutex<Shared>,
    /// Connection gate: `true` while the socket is up. Re-armed to `false`
    /// on every disconnect; `ensure_connected_now` waits on it.
    connected_tx: watch::Sender<bool>,
    cancel: CancellationToken,
    status_handlers: HandlerRegistry<ConnectionStatusHandler>,
    error_handlers: HandlerRegistry<ErrorHandler>,
    on_dispose: StdMutex<Option<Box<dyn FnOnce() + Send>>>,
}

/// Real-time changes client for one logical database.
///
/// Construction spawns the connection worker, which keeps reconnecting
/// until [`close`](DatabaseChanges::close) is called. Subscriptions created
/// while disconnected are registered locally and their `watch` commands are
/// sent as soon as the connection is (re-)established.
///
/// # Examples
///
/// ```rust,no_run
/// use nimbus_link::{DatabaseChanges, StaticEndpoint};
/// use std::sync::Arc;
///
/// # async fn example() -> nimbus_link::Result<()> {
/// let changes = DatabaseChanges::builder()
///     .database("northwind")
///     .resolver(Arc::new(StaticEndpoint::new("http://localhost:8080")))
///     .build()?;
///
/// let orders = changes.for_documents_in_collection("Orders").await?;
/// let subscription = orders.subscribe_fn(|change| {
///     println!("{} changed: {:?}", change.id, change.kind);
/// });
///
/// changes.ensure_connected_now().await?;
/// // ... later:
/// subscription.close();
/// changes.close().await;
/// # Ok(())
/// # }
/// ```
pub struct DatabaseChanges {
    inner: Arc<ChangesInner>,
    worker: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DatabaseChanges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseChanges")
            .field("database", &self.inner.database)
            .finish_non_exhaustive()
    }
}

/// Builder for [`DatabaseChanges`].
pub struct DatabaseChangesBuilder {
    database: Option<String>,
    resolver: Option<Arc<dyn EndpointResolver>>,
    transport: Option<Arc<dyn ChangesTransport>>,
    timeouts: NimbusLinkTimeouts,
    options: ConnectionOptions,
    on_dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl DatabaseChangesBuilder {
    fn new() -> Self {
        Self {
            database: None,
            resolver: None,
            transport: None,
            timeouts: NimbusLinkTimeouts::default(),
            options: ConnectionOptions::default(),
            on_dispose: None,
        }
    }

    /// Set the logical database to watch (required).
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the endpoint resolver supplying the preferred node (required).
    pub fn resolver(mut self, resolver: Arc<dyn EndpointResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Override the transport. Defaults to a real WebSocket.
    pub fn transport(mut self, transport: Arc<dyn ChangesTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override the timeout configuration.
    pub fn timeouts(mut self, timeouts: NimbusLinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Override the reconnection options.
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Hook invoked exactly once when the client is closed.
    pub fn on_dispose(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_dispose = Some(Box::new(hook));
        self
    }

    /// Build the client and spawn its connection worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<DatabaseChanges> {
        let database = match self.database {
            Some(db) if !db.is_empty() => db,
            _ => {
                return Err(NimbusLinkError::InvalidArgument(
                    "Database name cannot be empty".to_string(),
                ));
            },
        };
        let resolver = self.resolver.ok_or_else(|| {
            NimbusLinkError::Configuration("An endpoint resolver is required".to_string())
        })?;
        let transport = self.transport.unwrap_or_else(|| {
            Arc::new(WebSocketTransport::new(self.timeouts.connection_timeout))
        });

        let (connected_tx, _) = watch::channel(false);
        let inner = Arc::new(ChangesInner {
            database,
            resolver,
            transport,
            timeouts: self.timeouts,
            options: self.options,
            shared: Mutex::new(Shared {
                writer: None,
                command_id: 0,
                confirmations: HashMap::new(),
                states: HashMap::new(),
            }),
            connected_tx,
            cancel: CancellationToken::new(),
            status_handlers: HandlerRegistry::default(),
            error_handlers: HandlerRegistry::default(),
            on_dispose: StdMutex::new(self.on_dispose),
        });

        let worker = tokio::spawn(connection_worker(inner.clone()));

        Ok(DatabaseChanges { inner, worker: StdMutex::new(Some(worker)) })
    }
}

impl DatabaseChanges {
    /// Create a new builder.
    pub fn builder() -> DatabaseChangesBuilder {
        DatabaseChangesBuilder::new()
    }

    // ── Watch-target constructors ───────────────────────────────────────

    /// Observe every document in the database.
    pub async fn for_all_documents(&self) -> Result<ChangesObservable<DocumentChange>> {
        let state = ChangesInner::get_or_add_connection_state(
            &self.inner,
            "all-docs", "watch-docs", "unwatch-docs", "",
        )
        .await;
        Ok(self.observable(state, Arc::new(|_: &DocumentChange| true)))
    }

    /// Observe one document by id.
    pub async fn for_document(&self, doc_id: &str) -> Result<ChangesObservable<DocumentChange>> {
        if doc_id.is_empty() {
            return Err(NimbusLinkError::InvalidArgument(
                "Document id cannot be empty".to_string(),
            ));
        }
        let state = ChangesInner::get_or_add_connection_state(
            &self.inner,
            &format!("docs/{}", doc_id),
            "watch-doc",
            "unwatch-doc",
            doc_id,
        )
        .await;
        let target = doc_id.to_string();
        Ok(self.observable(
            state,
            Arc::new(move |change: &DocumentChange| change.id.eq_ignore_ascii_case(&target)),
        ))
    }

    /// Observe every document whose id starts with the given prefix.
    pub async fn for_documents_starting_with(
        &self,
        prefix: &str,
    ) -> Result<ChangesObservable<DocumentChange>> {
        if prefix.is_empty() {
            return Err(NimbusLinkError::InvalidArgument(
                "Document id prefix cannot be empty".to_string(),
            ));
        }
        let state = ChangesInner::get_or_add_connection_state(
            &self.inner,
            &format!("prefixes/{}", prefix),
            "watch-prefix",
            "unwatch-prefix",
            prefix,
        )
        .await;
        let target = prefix.to_string();
        Ok(self.observable(
            state,
            Arc::new(move |change: &DocumentChange| {
                change
                    .id
                    .get(..target.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(&target))
            }),
        ))
    }

    /// Observe every document in a collection.
    pub async fn for_documents_in_collection(
        &self,
        collection_name: &str,
    ) -> Result<ChangesObservable<DocumentChange>> {
        if collection_name.is_empty() {
            return Err(NimbusLinkError::InvalidArgument(
                "Collection name cannot be empty".to_string(),
            ));
        }
        let state = ChangesInner::get_or_add_connection_state(
            &self.inner,
            &format!("collections/{}", collection_name),
            "watch-collection",
            "unwatch-collection",
            collection_name,
        )
        .await;
        let target = collection_name.to_string();
        Ok(self.observable(
            state,
            Arc::new(move |change: &DocumentChange| {
                change.collection_name.eq_ignore_ascii_case(&target)
            }),
        ))
    }

    /// Observe every document of a declared type.
    ///
    /// The type name is percent-escaped on the wire and compared unescaped
    /// against inbound notifications.
    pub async fn for_documents_of_type(
        &self,
        type_name: &str,
    ) -> Result<ChangesObservable<DocumentChange>> {
        if type_name.is_empty() {
            return Err(NimbusLinkError::InvalidArgument(
                "Type name cannot be empty".to_string(),
            ));
        }
        let escaped = utf8_percent_encode(type_name, TYPE_NAME_ESCAPE).to_string();
        let state = ChangesInner::get_or_add_connection_state(
            &self.inner,
            &format!("types/{}", type_name),
            "watch-type",
            "unwatch-type",
            &escaped,
        )
        .await;
        let target = type_name.to_string();
        Ok(self.observable(
            state,
            Arc::new(move |change: &DocumentChange| {
                change.type_name.eq_ignore_ascii_case(&target)
            }),
        ))
    }

    /// Observe one index by name.
    pub async fn for_index(&self, index_name: &str) -> Result<ChangesObservable<IndexChange>> {
        if index_name.is_empty() {
            return Err(NimbusLinkError::InvalidArgument(
                "Index name cannot be empty".to_string(),
            ));
        }
        let state = ChangesInner::get_or_add_connection_state(
            &self.inner,
            &format!("indexes/{}", index_name),
            "watch-index",
            "unwatch-index",
            index_name,
        )
        .await;
        let target = index_name.to_string();
        Ok(self.observable(
            state,
            Arc::new(move |change: &IndexChange| change.name.eq_ignore_ascii_case(&target)),
        ))
    }

    /// Observe every index.
    pub async fn for_all_indexes(&self) -> Result<ChangesObservable<IndexChange>> {
        let state = ChangesInner::get_or_add_connection_state(
            &self.inner,
            "all-indexes", "watch-indexes", "unwatch-indexes", "",
        )
        .await;
        Ok(self.observable(state, Arc::new(|_: &IndexChange| true)))
    }

    /// Observe one long-running operation by id.
    pub async fn for_operation_id(
        &self,
        operation_id: i64,
    ) -> Result<ChangesObservable<OperationStatusChange>> {
        let state = ChangesInner::get_or_add_connection_state(
            &self.inner,
            &format!("operations/{}", operation_id),
            "watch-operation",
            "unwatch-operation",
            &operation_id.to_string(),
        )
        .await;
        Ok(self.observable(
            state,
            Arc::new(move |change: &OperationStatusChange| change.operation_id == operation_id),
        ))
    }

    /// Observe every long-running operation.
    pub async fn for_all_operations(&self) -> Result<ChangesObservable<OperationStatusChange>> {
        let state = ChangesInner::get_or_add_connection_state(
            &self.inner,
            "all-operations",
            "watch-operations",
            "unwatch-operations",
            "",
        )
        .await;
        Ok(self.observable(state, Arc::new(|_: &OperationStatusChange| true)))
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Wait until the connection is up.
    ///
    /// Completes immediately when already connected; fails once the client
    /// has been closed.
    pub async fn ensure_connected_now(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(NimbusLinkError::Closed("client closed".to_string()));
        }
        let mut connected_rx = self.inner.connected_tx.subscribe();
        tokio::select! {
            _ = self.inner.cancel.cancelled() => {
                Err(NimbusLinkError::Closed("client closed".to_string()))
            },
            result = connected_rx.wait_for(|connected| *connected) => {
                result
                    .map(|_| ())
                    .map_err(|_| NimbusLinkError::Closed("client closed".to_string()))
            },
        }
    }

    /// Whether the socket is currently up.
    pub fn is_connected(&self) -> bool {
        *self.inner.connected_tx.borrow()
    }

    /// Keys of all currently watched targets, e.g. `collections/Orders`.
    pub async fn watched_targets(&self) -> Vec<String> {
        self.inner.shared.lock().await.states.keys().cloned().collect()
    }

    /// The most recent error recorded on any watch target, if any.
    pub async fn last_connection_state_error(&self) -> Option<Arc<NimbusLinkError>> {
        let shared = self.inner.shared.lock().await;
        shared.states.values().find_map(|state| state.last_error())
    }

    /// Register a handler fired on every connection-status transition.
    pub fn add_connection_status_changed(
        &self,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.status_handlers.add(Arc::new(handler))
    }

    /// Remove a previously registered status handler.
    pub fn remove_connection_status_changed(&self, id: HandlerId) {
        self.inner.status_handlers.remove(id);
    }

    /// Register a handler fired for every broadcast error.
    pub fn add_on_error(
        &self,
        handler: impl Fn(&NimbusLinkError) + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.error_handlers.add(Arc::new(handler))
    }

    /// Remove a previously registered error handler.
    pub fn remove_on_error(&self, id: HandlerId) {
        self.inner.error_handlers.remove(id);
    }

    /// Shut the client down.
    ///
    /// Cancels the reconnect loop, fails every pending command, closes the
    /// socket, clears the watch-target table, waits for the worker (and
    /// with it the reader) to exit, fires the status handlers one final
    /// time, and runs the dispose hook. Call once; further use of the
    /// client after `close` fails with [`NimbusLinkError::Closed`] or is a
    /// no-op.
    pub async fn close(&self) {
        self.inner.cancel.cancel();

        let (writer, states) = {
            let mut shared = self.inner.shared.lock().await;
            shared.confirmations.clear();
            let writer = shared.writer.take();
            let states: Vec<_> = shared.states.drain().map(|(_, state)| state).collect();
            self.inner.connected_tx.send_replace(false);
            (writer, states)
        };

        if let Some(mut writer) = writer {
            let _ = writer.close().await;
        }
        for state in states {
            state.clear();
        }

        let worker = self.worker.lock().expect("worker lock poisoned").take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        self.inner.invoke_connection_status();

        let hook = self.inner.on_dispose.lock().expect("dispose lock poisoned").take();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn observable<T: crate::observable::ChangeNotification>(
        &self,
        state: Arc<DatabaseConnectionState>,
        filter: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    ) -> ChangesObservable<T> {
        ChangesObservable::new(state, filter, self.teardown_hook())
    }

    /// Teardown installed on every observable: fired when a target's last
    /// listener unsubscribes.
    fn teardown_hook(&self) -> StateTeardown {
        let inner = Arc::downgrade(&self.inner);
        Arc::new(move |state| {
            if let Some(inner) = inner.upgrade() {
                ChangesInner::spawn_teardown(inner, state);
            }
        })
    }
}

impl ChangesInner {
    /// Find or create the state for a watch-target key.
    ///
    /// Whether the `watch` command fires now is decided under the same lock
    /// that installs the writer on reconnect: a state created before that
    /// critical section is covered by the replay snapshot, one created
    /// after sees the writer here. Either way the watch is sent once.
    async fn get_or_add_connection_state(
        inner: &Arc<Self>,
        key: &str,
        watch_command: &str,
        unwatch_command: &str,
        value: &str,
    ) -> Arc<DatabaseConnectionState> {
        let (state, send_watch) = {
            let mut shared = inner.shared.lock().await;
            if let Some(existing) = shared.states.get(key) {
                (existing.clone(), false)
            } else {
                let state = Arc::new(DatabaseConnectionState::new(
                    key.to_string(),
                    watch_command,
                    unwatch_command,
                    value.to_string(),
                ));
                shared.states.insert(key.to_string(), state.clone());
                (state, shared.writer.is_some())
            }
        };

        if send_watch {
            Self::schedule_watch(inner, &state);
        }
        state
    }

    /// Send the `watch` command for a target, fire-and-forget.
    ///
    /// A dropped watch is retried on the next reconnect, when every live
    /// target's watch is replayed.
    fn schedule_watch(inner: &Arc<Self>, state: &Arc<DatabaseConnectionState>) {
        let inner = inner.clone();
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = inner
                .send_command(state.watch_command(), state.value())
                .await
            {
                log::warn!(
                    "[nimbus-link] Failed to send {} for '{}': {}",
                    state.watch_command(),
                    state.key(),
                    e
                );
            }
        });
    }

    fn spawn_teardown(inner: Arc<Self>, state: Arc<DatabaseConnectionState>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    inner.drop_connection_state(state).await;
                });
            },
            Err(_) => {
                // Dropped outside the runtime: local bookkeeping only, the
                // server forgets the target when the connection dies.
                if state.listener_count() > 0 {
                    return;
                }
                if let Ok(mut shared) = inner.shared.try_lock() {
                    shared.states.remove(state.key());
                }
                state.clear();
            },
        }
    }

    /// Tear one target down: tell the server first, then forget it locally.
    ///
    /// Runs on a spawned task after the last listener closed; a listener
    /// attached through an existing observable in the meantime keeps the
    /// target alive, so the teardown re-checks under the lock and backs
    /// out.
    async fn drop_connection_state(&self, state: Arc<DatabaseConnectionState>) {
        let pending = {
            let mut shared = self.shared.lock().await;
            if !shared.states.contains_key(state.key()) {
                // Already removed, e.g. by close().
                state.clear();
                return;
            }
            if state.listener_count() > 0 {
                return;
            }
            let pending = if shared.writer.is_some() {
                self.write_command_locked(&mut shared, state.unwatch_command(), state.value())
                    .await
                    .ok()
            } else {
                // A dead connection implies the server already dropped all
                // subscriptions.
                None
            };
            shared.states.remove(state.key());
            pending
        };

        if let Some((command_id, confirm_rx)) = pending {
            if let Err(e) = self.await_confirmation(command_id, confirm_rx).await {
                log::debug!(
                    "[nimbus-link] Unwatch for '{}' not confirmed: {}",
                    state.key(),
                    e
                );
            }
        }
        state.clear();
    }

    /// Write a command frame and register its pending confirmation.
    ///
    /// Caller holds the shared lock; the confirmation wait happens after it
    /// is released.
    async fn write_command_locked(
        &self,
        shared: &mut Shared,
        command: &str,
        param: &str,
    ) -> Result<(u64, oneshot::Receiver<()>)> {
        let writer = shared.writer.as_mut().ok_or_else(|| {
            NimbusLinkError::NotConnected("changes connection is down".to_string())
        })?;

        shared.command_id += 1;
        let command_id = shared.command_id;

        let envelope = CommandEnvelope::new(command_id, command, param);
        let payload = serde_json::to_string(&envelope).map_err(|e| {
            NimbusLinkError::Serialization(format!("Failed to serialize command: {}", e))
        })?;

        writer
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| NimbusLinkError::WebSocket(format!("Failed to send command: {}", e)))?;

        let (confirm_tx, confirm_rx) = oneshot::channel();
        shared.confirmations.insert(command_id, confirm_tx);
        Ok((command_id, confirm_rx))
    }

    /// Send a command and wait for the server's confirmation.
    async fn send_command(&self, command: &str, param: &str) -> Result<()> {
        let (command_id, confirm_rx) = {
            let mut shared = self.shared.lock().await;
            self.write_command_locked(&mut shared, command, param).await?
        };
        self.await_confirmation(command_id, confirm_rx).await
    }

    async fn await_confirmation(
        &self,
        command_id: u64,
        confirm_rx: oneshot::Receiver<()>,
    ) -> Result<()> {
        match tokio::time::timeout(self.timeouts.confirmation_timeout, confirm_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(NimbusLinkError::NotConnected(
                "connection closed before confirmation".to_string(),
            )),
            Err(_) => {
                self.shared.lock().await.confirmations.remove(&command_id);
                Err(NimbusLinkError::Timeout(format!(
                    "No confirmation for command {} within {:?}",
                    command_id, self.timeouts.confirmation_timeout
                )))
            },
        }
    }

    fn invoke_connection_status(&self) {
        self.status_handlers.invoke();
    }

    /// Broadcast an error to global handlers and every watch target.
    async fn notify_about_error(&self, error: Arc<NimbusLinkError>) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.error_handlers.invoke(&error);

        let states: Vec<_> = {
            let shared = self.shared.lock().await;
            shared.states.values().cloned().collect()
        };
        for state in states {
            state.fail(error.clone());
        }
    }

    /// Tear the connection down after the read loop exits.
    async fn handle_disconnect(&self, error: Arc<NimbusLinkError>) {
        {
            let mut shared = self.shared.lock().await;
            shared.writer = None;
            // Dropping the senders fails every pending confirmation.
            shared.confirmations.clear();
            self.connected_tx.send_replace(false);
        }
        self.invoke_connection_status();
        self.notify_about_error(error).await;
    }

    /// The sole reader of the connection; returns the reason it ended.
    async fn read_loop(&self, mut stream: WireStream) -> NimbusLinkError {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return NimbusLinkError::Closed("client closed".to_string());
                },
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.process_frame_batch(&text).await {
                            return e;
                        }
                    },
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => {
                            if let Err(e) = self.process_frame_batch(text).await {
                                return e;
                            }
                        },
                        Err(e) => {
                            log::warn!("[nimbus-link] Non-UTF-8 binary frame skipped: {}", e);
                        },
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let mut shared = self.shared.lock().await;
                        if let Some(writer) = shared.writer.as_mut() {
                            let _ = writer.send(Message::Pong(payload)).await;
                        }
                    },
                    Some(Ok(Message::Close(_))) => {
                        return NimbusLinkError::WebSocket(
                            "server closed the connection".to_string(),
                        );
                    },
                    Some(Ok(_)) => {},
                    Some(Err(e)) => {
                        return NimbusLinkError::WebSocket(format!("read failed: {}", e));
                    },
                    None => {
                        return NimbusLinkError::WebSocket("stream ended".to_string());
                    },
                },
            }
        }
    }

    /// Decode one inbound message: an ordered batch of frames.
    ///
    /// A frame with an unrecognized `Type` is skipped; a message that is
    /// not a JSON array at all is a protocol error and kills the
    /// connection.
    async fn process_frame_batch(&self, text: &str) -> Result<()> {
        let frames: Vec<serde_json::Value> = serde_json::from_str(text).map_err(|e| {
            NimbusLinkError::Serialization(format!("Malformed frame batch: {}", e))
        })?;

        for frame in frames {
            match serde_json::from_value::<ServerFrame>(frame) {
                Ok(frame) => self.route_frame(frame).await,
                Err(e) => {
                    log::warn!("[nimbus-link] Skipping unrecognized frame: {}", e);
                },
            }
        }
        Ok(())
    }

    async fn route_frame(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Error { error } => {
                // Server-level error; the connection itself is healthy.
                self.notify_about_error(Arc::new(NimbusLinkError::Server(error))).await;
            },
            ServerFrame::Confirm { command_id } => {
                let confirm_tx = self.shared.lock().await.confirmations.remove(&command_id);
                match confirm_tx {
                    Some(tx) => {
                        let _ = tx.send(());
                    },
                    // The server is authoritative; a confirmation for an
                    // unknown id (e.g. after a local timeout) is ignored.
                    None => {
                        log::debug!(
                            "[nimbus-link] Confirmation for unknown command {}",
                            command_id
                        );
                    },
                }
            },
            ServerFrame::DocumentChange { value } => {
                self.dispatch_change(DatabaseChange::Document(value)).await;
            },
            ServerFrame::IndexChange { value } => {
                self.dispatch_change(DatabaseChange::Index(value)).await;
            },
            ServerFrame::OperationStatusChange { value } => {
                self.dispatch_change(DatabaseChange::OperationStatus(value)).await;
            },
        }
    }

    /// Fan one notification out to every watch target.
    async fn dispatch_change(&self, change: DatabaseChange) {
        let states: Vec<_> = {
            let shared = self.shared.lock().await;
            shared.states.values().cloned().collect()
        };
        for state in states {
            state.dispatch(&change);
        }
    }

    /// Resolve the preferred node and open the changes connection.
    async fn try_connect(&self) -> Result<(WireSink, WireStream)> {
        let base_url = self.resolver.preferred_node().await?;
        let url = resolve_changes_url(&base_url, &self.database)?;
        self.transport.connect(&url).await
    }
}

/// The connection worker: connect, read until the connection dies,
/// reconnect with backoff, until canceled.
async fn connection_worker(inner: Arc<ChangesInner>) {
    let mut attempt: u32 = 0;
    loop {
        if inner.cancel.is_cancelled() {
            return;
        }

        match inner.try_connect().await {
            Ok((sink, stream)) => {
                attempt = 0;

                // Install the writer and snapshot the replay set under one
                // lock acquisition; see get_or_add_connection_state.
                let replay: Vec<_> = {
                    let mut shared = inner.shared.lock().await;
                    shared.writer = Some(sink);
                    inner.connected_tx.send_replace(true);
                    shared.states.values().cloned().collect()
                };

                log::info!(
                    "[nimbus-link] Connected; replaying {} watch target(s)",
                    replay.len()
                );
                inner.invoke_connection_status();
                for state in &replay {
                    ChangesInner::schedule_watch(&inner, state);
                }

                let reason = inner.read_loop(stream).await;
                if !inner.cancel.is_cancelled() {
                    log::warn!("[nimbus-link] Changes connection lost: {}", reason);
                }
                inner.handle_disconnect(Arc::new(reason)).await;
            },
            Err(e) => {
                inner.invoke_connection_status();
                let delay_ms = inner.options.backoff_delay_ms(attempt);
                attempt = attempt.saturating_add(1);
                if !inner.cancel.is_cancelled() {
                    log::warn!(
                        "[nimbus-link] Connection attempt failed ({}); retrying in {}ms",
                        e,
                        delay_ms
                    );
                }
                inner.notify_about_error(Arc::new(e)).await;

                tokio::select! {
                    _ = inner.cancel.cancelled() => return,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => {},
                }
            },
        }
    }
}
