//! Transport layer for inter-node communication
//!
//! A [`Network`] dials peers and serves inbound calls. Remote transports
//! speak the tarpc `PartitionRpc` service:
//!
//! - **TCP**: plain TCP, length-delimited bincode frames (default)
//! - **QUIC**: Quinn QUIC with TLS encryption
//! - **Local**: in-process dispatch, no sockets

mod local;
mod quic;
mod tcp;

pub use local::LocalNetwork;
pub use quic::QuicNetwork;
pub use tcp::TcpNetwork;

use crate::config::TlsConfig;
use crate::error::Result;
use crate::types::{Closer, RunCloser, Runner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Communication network between servers in the cluster
#[async_trait]
pub trait Network: Send + Sync {
    /// Establish an outbound channel to `addr`
    async fn dial_client(&self, addr: &str) -> Result<Arc<dyn RunCloser>>;

    /// Start serving inbound calls at `addr`, dispatching each to `handler`
    async fn register_server(&self, addr: &str, handler: Arc<dyn Runner>)
        -> Result<Box<dyn Closer>>;

    /// Get the transport name
    fn name(&self) -> &'static str;
}

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// tarpc over TCP
    Tcp,

    /// tarpc over QUIC with TLS
    Quic {
        #[serde(default)]
        tls: TlsConfig,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Tcp
    }
}

impl TransportConfig {
    /// Create the configured network
    pub fn create_network(
        &self,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Arc<dyn Network>> {
        match self {
            TransportConfig::Tcp => Ok(Arc::new(TcpNetwork::new(connect_timeout, request_timeout))),
            TransportConfig::Quic { tls } => Ok(Arc::new(QuicNetwork::new(
                tls.clone(),
                connect_timeout,
                request_timeout,
            )?)),
        }
    }
}
