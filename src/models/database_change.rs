use super::document_change::DocumentChange;
use super::index_change::IndexChange;
use super::operation_status_change::OperationStatusChange;

/// A change notification of any kind, as fanned out to subscription states.
///
/// Listeners registered through a typed observable project this sum back to
/// the payload kind they subscribed for; non-matching kinds are skipped.
#[derive(Debug, Clone)]
pub enum DatabaseChange {
    /// A document was put/deleted or a bulk insert started/ended.
    Document(DocumentChange),
    /// An index was added/removed or an indexing batch completed.
    Index(IndexChange),
    /// A long-running operation changed state.
    OperationStatus(OperationStatusChange),
}
