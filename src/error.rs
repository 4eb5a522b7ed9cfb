//! Error types for the nimbus-link changes client.

use thiserror::Error;

/// Errors surfaced by the changes client.
///
/// Connection-level failures (endpoint resolution, socket errors, protocol
/// errors) are broadcast to error handlers and subscription listeners rather
/// than returned from any single call; see the crate docs for the
/// propagation rules.
#[derive(Error, Debug)]
pub enum NimbusLinkError {
    /// A caller-supplied argument was rejected before touching the network.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed base URL or unsupported scheme.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The topology layer could not supply a reachable server node.
    #[error("Endpoint resolution failed: {0}")]
    EndpointResolution(String),

    /// Socket open/read/write failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Malformed inbound frame or unserializable outbound command.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An explicit `Error` frame reported by the server.
    #[error("Server error: {0}")]
    Server(String),

    /// No confirmation arrived within the configured bound.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The operation needed an active connection and none was available.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// The client has been closed and will not reconnect.
    #[error("Client closed: {0}")]
    Closed(String),
}

/// Result type for changes-client operations.
pub type Result<T> = std::result::Result<T, NimbusLinkError>;
