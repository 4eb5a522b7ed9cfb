use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Notification that a long-running server operation changed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatusChange {
    /// Server-assigned operation id.
    #[serde(rename = "OperationId")]
    pub operation_id: i64,

    /// Opaque state payload; shape depends on the operation type.
    #[serde(rename = "State", default)]
    pub state: JsonValue,
}
