use serde::{Deserialize, Serialize};

/// Connection-level options for the changes WebSocket.
///
/// Reconnection runs until the client is closed; these options only shape
/// the backoff curve between attempts.
///
/// # Example
///
/// ```rust
/// use nimbus_link::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_reconnect_delay_ms(2000)
///     .with_max_reconnect_delay_ms(60_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Initial delay in milliseconds between reconnection attempts.
    /// Default: 1000ms (1 second)
    /// Uses exponential backoff up to `max_reconnect_delay_ms`.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum delay between reconnection attempts.
    /// Default: 30000ms (30 seconds)
    #[serde(default = "default_max_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_delay_ms() -> u64 {
    30_000
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_max_reconnect_delay_ms(),
        }
    }
}

impl ConnectionOptions {
    /// Set the initial reconnect delay in milliseconds.
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the maximum reconnect delay in milliseconds.
    pub fn with_max_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_reconnect_delay_ms = delay_ms;
        self
    }

    /// Backoff delay for the given zero-based attempt number.
    pub(crate) fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        std::cmp::min(
            self.reconnect_delay_ms.saturating_mul(2u64.saturating_pow(attempt)),
            self.max_reconnect_delay_ms,
        )
    }
}
