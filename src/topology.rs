//! Endpoint resolution seam.
//!
//! The driver's HTTP routing/topology layer decides which server node the
//! changes connection should target; this crate only consumes that decision
//! through [`EndpointResolver`]. The resolver is called on every connect and
//! reconnect, so failover decisions made elsewhere take effect on the next
//! attempt.

use async_trait::async_trait;

use crate::error::{NimbusLinkError, Result};

/// Supplies the currently preferred server node for the changes connection.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Return the base URL of the preferred node, e.g. `http://10.0.0.5:8080`.
    async fn preferred_node(&self) -> Result<String>;
}

/// Resolver pinned to a single server URL.
///
/// Useful for single-node deployments and tests; clustered drivers plug in
/// their topology-aware resolver instead.
pub struct StaticEndpoint {
    url: String,
}

impl StaticEndpoint {
    /// Create a resolver that always returns `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl EndpointResolver for StaticEndpoint {
    async fn preferred_node(&self) -> Result<String> {
        if self.url.trim().is_empty() {
            return Err(NimbusLinkError::EndpointResolution(
                "no server URL configured".to_string(),
            ));
        }
        Ok(self.url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_endpoint_returns_configured_url() {
        let resolver = StaticEndpoint::new("http://localhost:8080");
        assert_eq!(resolver.preferred_node().await.unwrap(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_static_endpoint_rejects_empty_url() {
        let resolver = StaticEndpoint::new("   ");
        assert!(resolver.preferred_node().await.is_err());
    }
}
