//! Timeout configuration for the changes client.

use std::time::Duration;

/// Timeout configuration for changes-client operations.
///
/// # Examples
///
/// ```rust
/// use nimbus_link::NimbusLinkTimeouts;
/// use std::time::Duration;
///
/// // Use defaults (recommended for most cases)
/// let timeouts = NimbusLinkTimeouts::default();
///
/// // Custom confirmation bound for high-latency environments
/// let timeouts = NimbusLinkTimeouts::default()
///     .with_confirmation_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct NimbusLinkTimeouts {
    /// Timeout for establishing the WebSocket connection (TCP + handshake).
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Maximum time a command send waits for the server's `Confirm` frame.
    /// Default: 15 seconds
    pub confirmation_timeout: Duration,
}

impl Default for NimbusLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            confirmation_timeout: Duration::from_secs(15),
        }
    }
}

impl NimbusLinkTimeouts {
    /// Create timeouts optimized for fast local development.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            confirmation_timeout: Duration::from_secs(2),
        }
    }

    /// Set the connection-establishment timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the command-confirmation timeout.
    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_confirmation_timeout_is_fifteen_seconds() {
        let timeouts = NimbusLinkTimeouts::default();
        assert_eq!(timeouts.confirmation_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_with_setters_override_defaults() {
        let timeouts = NimbusLinkTimeouts::default()
            .with_connection_timeout(Duration::from_secs(3))
            .with_confirmation_timeout(Duration::from_millis(500));
        assert_eq!(timeouts.connection_timeout, Duration::from_secs(3));
        assert_eq!(timeouts.confirmation_timeout, Duration::from_millis(500));
    }
}
