//! `nimbus-link`: real-time change notifications for NimbusDB.
//!
//! The client keeps one persistent WebSocket to a database's changes
//! endpoint and multiplexes any number of subscriptions over it. Watch
//! targets (a document, an id prefix, a collection, a type, an index, an
//! operation, or the "everything" variants) are registered with the server
//! through confirmed commands, notifications are fanned out to local
//! subscribers, and the connection is re-established automatically with
//! exponential backoff until the client is closed.
//!
//! # Examples
//!
//! ```rust,no_run
//! use nimbus_link::{DatabaseChanges, StaticEndpoint};
//! use std::sync::Arc;
//!
//! # async fn example() -> nimbus_link::Result<()> {
//! let changes = DatabaseChanges::builder()
//!     .database("northwind")
//!     .resolver(Arc::new(StaticEndpoint::new("http://localhost:8080")))
//!     .build()?;
//!
//! let orders = changes.for_documents_in_collection("Orders").await?;
//! let subscription = orders.subscribe_fn(|change| {
//!     println!("{:?} {}", change.kind, change.id);
//! });
//!
//! changes.ensure_connected_now().await?;
//! // ...
//! subscription.close();
//! changes.close().await;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod event_handlers;
pub mod models;
pub mod observable;
pub mod timeouts;
pub mod topology;
pub mod transport;

pub(crate) mod state;

pub use connection::{DatabaseChanges, DatabaseChangesBuilder};
pub use error::{NimbusLinkError, Result};
pub use event_handlers::HandlerId;
pub use models::{
    CommandEnvelope, ConnectionOptions, DatabaseChange, DocumentChange, DocumentChangeKind,
    IndexChange, IndexChangeKind, OperationStatusChange, ServerFrame,
};
pub use observable::{ChangeNotification, ChangesObservable, ChangesObserver, Subscription};
pub use timeouts::NimbusLinkTimeouts;
pub use topology::{EndpointResolver, StaticEndpoint};
pub use transport::{ChangesTransport, WebSocketTransport, WireSink, WireStream};
