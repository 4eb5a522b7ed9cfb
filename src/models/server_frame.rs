use serde::Deserialize;

use super::document_change::DocumentChange;
use super::index_change::IndexChange;
use super::operation_status_change::OperationStatusChange;

/// Server-to-client frame, classified by its `Type` field.
///
/// The server sends frames in batches (a JSON array per WebSocket message);
/// each element decodes independently so an unknown `Type` only skips that
/// one frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Type")]
pub enum ServerFrame {
    /// Server-level error; the connection itself stays up.
    Error {
        /// Error message reported by the server.
        #[serde(rename = "Error")]
        error: String,
    },

    /// Acknowledgement of a watch/unwatch command.
    Confirm {
        /// The `CommandId` of the command being confirmed.
        #[serde(rename = "CommandId")]
        command_id: u64,
    },

    /// A document changed.
    DocumentChange {
        /// The change payload.
        #[serde(rename = "Value")]
        value: DocumentChange,
    },

    /// An index changed.
    IndexChange {
        /// The change payload.
        #[serde(rename = "Value")]
        value: IndexChange,
    },

    /// A long-running operation changed state.
    OperationStatusChange {
        /// The change payload.
        #[serde(rename = "Value")]
        value: OperationStatusChange,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentChangeKind, IndexChangeKind};

    #[test]
    fn test_confirm_frame_decodes() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"Type":"Confirm","CommandId":42}"#).unwrap();
        match frame {
            ServerFrame::Confirm { command_id } => assert_eq!(command_id, 42),
            other => panic!("expected Confirm, got {:?}", other),
        }
    }

    #[test]
    fn test_error_frame_decodes() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"Type":"Error","Error":"index corrupted"}"#).unwrap();
        match frame {
            ServerFrame::Error { error } => assert_eq!(error, "index corrupted"),
            other => panic!("expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_document_change_frame_decodes() {
        let raw = r#"{
            "Type": "DocumentChange",
            "Value": {
                "Type": "Put",
                "Id": "orders/1",
                "CollectionName": "Orders",
                "TypeName": "Order",
                "ChangeVector": "A:1-abc"
            }
        }"#;
        let frame: ServerFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ServerFrame::DocumentChange { value } => {
                assert_eq!(value.kind, DocumentChangeKind::Put);
                assert_eq!(value.id, "orders/1");
                assert_eq!(value.collection_name, "Orders");
                assert_eq!(value.type_name, "Order");
                assert_eq!(value.change_vector.as_deref(), Some("A:1-abc"));
            },
            other => panic!("expected DocumentChange, got {:?}", other),
        }
    }

    #[test]
    fn test_index_change_frame_tolerates_missing_optionals() {
        let raw = r#"{"Type":"IndexChange","Value":{"Type":"BatchCompleted","Name":"Orders/ByTotal"}}"#;
        let frame: ServerFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ServerFrame::IndexChange { value } => {
                assert_eq!(value.kind, IndexChangeKind::BatchCompleted);
                assert_eq!(value.name, "Orders/ByTotal");
                assert_eq!(value.etag, None);
            },
            other => panic!("expected IndexChange, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_change_kind_maps_to_unknown_variant() {
        let raw = r#"{"Type":"DocumentChange","Value":{"Type":"SomethingNew","Id":"x/1"}}"#;
        let frame: ServerFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ServerFrame::DocumentChange { value } => {
                assert_eq!(value.kind, DocumentChangeKind::Unknown);
            },
            other => panic!("expected DocumentChange, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_frame_type_is_a_decode_error() {
        let result =
            serde_json::from_str::<ServerFrame>(r#"{"Type":"TopologyChange","Value":{}}"#);
        assert!(result.is_err());
    }
}
