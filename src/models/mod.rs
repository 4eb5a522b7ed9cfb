//! Data models for the nimbus-link changes client.
//!
//! Defines the outbound command envelope, the inbound frame union, and the
//! typed change-notification payloads carried by `Value` fields.

pub mod command_envelope;
pub mod connection_options;
pub mod database_change;
pub mod document_change;
pub mod index_change;
pub mod operation_status_change;
pub mod server_frame;

pub use command_envelope::CommandEnvelope;
pub use connection_options::ConnectionOptions;
pub use database_change::DatabaseChange;
pub use document_change::{DocumentChange, DocumentChangeKind};
pub use index_change::{IndexChange, IndexChangeKind};
pub use operation_status_change::OperationStatusChange;
pub use server_frame::ServerFrame;
