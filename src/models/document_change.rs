use serde::{Deserialize, Serialize};

/// What happened to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentChangeKind {
    /// Document created or overwritten.
    Put,
    /// Document deleted.
    Delete,
    /// A bulk-insert operation started on the server.
    BulkInsertStarted,
    /// A bulk-insert operation finished.
    BulkInsertEnded,
    /// A kind this client version does not know about.
    #[serde(other)]
    Unknown,
}

/// Notification that a document changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChange {
    /// Kind of change.
    #[serde(rename = "Type")]
    pub kind: DocumentChangeKind,

    /// Document id, e.g. `orders/1`.
    #[serde(rename = "Id", default)]
    pub id: String,

    /// Collection the document belongs to.
    #[serde(rename = "CollectionName", default)]
    pub collection_name: String,

    /// Declared (client-side) type name of the document, if any.
    #[serde(rename = "TypeName", default)]
    pub type_name: String,

    /// Server change vector at the time of the change.
    #[serde(rename = "ChangeVector", default)]
    pub change_vector: Option<String>,
}
