use serde::{Deserialize, Serialize};

/// Client-to-server command frame.
///
/// One envelope is written per watch/unwatch request; the server replies
/// with a `Confirm` frame carrying the same `CommandId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Strictly increasing identifier assigned under the writer lock.
    #[serde(rename = "CommandId")]
    pub command_id: u64,

    /// Command verb, e.g. `watch-collection` or `unwatch-doc`.
    #[serde(rename = "Command")]
    pub command: String,

    /// Command parameter; empty string for wildcard watches.
    #[serde(rename = "Param")]
    pub param: String,
}

impl CommandEnvelope {
    /// Build an envelope for the given verb/parameter pair.
    pub fn new(command_id: u64, command: impl Into<String>, param: impl Into<String>) -> Self {
        Self {
            command_id,
            command: command.into(),
            param: param.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_uses_wire_field_names() {
        let envelope = CommandEnvelope::new(7, "watch-collection", "Orders");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "CommandId": 7,
                "Command": "watch-collection",
                "Param": "Orders",
            })
        );
    }
}
