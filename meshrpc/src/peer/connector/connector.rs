use anyhow::Result;
use async_trait::async_trait;

use crate::{
    peer::proxy::ProxyConfig,
    transport::transport::Transport,
};

/// A connector, which establishes the network half of a new session.
///
/// Failures to reach the remote endpoint surface as
/// [`TransportError::Unreachable`](crate::core::error::TransportError), the
/// retryable connect-time fault.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a transport to the endpoint described by the configuration.
    async fn connect(&self, config: &ProxyConfig) -> Result<Box<dyn Transport>>;
}
