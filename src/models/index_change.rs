use serde::{Deserialize, Serialize};

/// What happened to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexChangeKind {
    /// Index was created.
    IndexAdded,
    /// Index was deleted.
    IndexRemoved,
    /// An indexing batch completed.
    BatchCompleted,
    /// Indexing reached an error state.
    IndexMarkedAsErrored,
    /// A kind this client version does not know about.
    #[serde(other)]
    Unknown,
}

/// Notification that an index changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexChange {
    /// Kind of change.
    #[serde(rename = "Type")]
    pub kind: IndexChangeKind,

    /// Index name.
    #[serde(rename = "Name", default)]
    pub name: String,

    /// Index etag after the change, when reported.
    #[serde(rename = "Etag", default)]
    pub etag: Option<i64>,
}
