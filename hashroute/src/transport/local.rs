//! In-process network
//!
//! Servers are kept in a shared address map and calls are dispatched
//! directly, with replies passed through the same error encoding the
//! remote transports use. Handy for tests and single-process clusters.

use super::Network;
use crate::error::{Result, RouterError};
use crate::types::{Closer, RunCloser, RunReply, Runner};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct Inner {
    servers: RwLock<HashMap<String, Arc<dyn Runner>>>,
    dials: AtomicUsize,
}

/// Shared in-process network; clones see the same servers
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<Inner>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of dials attempted so far
    pub fn dial_count(&self) -> usize {
        self.inner.dials.load(Ordering::SeqCst)
    }

    /// Addresses with a running server
    pub fn server_addrs(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.inner.servers.read().keys().cloned().collect();
        addrs.sort();
        addrs
    }

    fn handler(&self, addr: &str) -> Option<Arc<dyn Runner>> {
        self.inner.servers.read().get(addr).cloned()
    }
}

#[async_trait]
impl Network for LocalNetwork {
    async fn dial_client(&self, addr: &str) -> Result<Arc<dyn RunCloser>> {
        self.inner.dials.fetch_add(1, Ordering::SeqCst);
        if self.handler(addr).is_none() {
            return Err(RouterError::Dial(format!("No server listening at {}", addr)));
        }

        Ok(Arc::new(LocalClient {
            network: self.clone(),
            addr: addr.to_string(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn register_server(
        &self,
        addr: &str,
        handler: Arc<dyn Runner>,
    ) -> Result<Box<dyn Closer>> {
        {
            let mut servers = self.inner.servers.write();
            if servers.contains_key(addr) {
                return Err(RouterError::Transport(format!(
                    "Address {} already in use",
                    addr
                )));
            }
            servers.insert(addr.to_string(), handler);
        }
        debug!(addr = %addr, "Local server started");

        Ok(Box::new(LocalServer {
            network: self.clone(),
            addr: addr.to_string(),
            released: AtomicBool::new(false),
        }))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

struct LocalClient {
    network: LocalNetwork,
    addr: String,
    closed: AtomicBool,
}

#[async_trait]
impl Runner for LocalClient {
    async fn run(&self, hash: u64, input: Vec<u8>) -> Result<Vec<u8>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RouterError::Closed);
        }
        // A stopped server behaves like a dropped connection
        let handler = self.network.handler(&self.addr).ok_or_else(|| {
            RouterError::Transport(format!("Connection to {} lost", self.addr))
        })?;

        RunReply::from_result(handler.run(hash, input).await).into_result()
    }
}

#[async_trait]
impl Closer for LocalClient {
    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct LocalServer {
    network: LocalNetwork,
    addr: String,
    released: AtomicBool,
}

#[async_trait]
impl Closer for LocalServer {
    async fn close(&self) -> Result<()> {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.network.inner.servers.write().remove(&self.addr);
            debug!(addr = %self.addr, "Local server stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FnRunner;

    fn echo() -> Arc<dyn Runner> {
        Arc::new(FnRunner::new(|_, input: Vec<u8>| async move { Ok(input) }))
    }

    #[tokio::test]
    async fn test_dial_run_close() {
        let network = LocalNetwork::new();
        let server = network.register_server("a:1", echo()).await.unwrap();
        assert_eq!(network.server_addrs(), vec!["a:1".to_string()]);

        let client = network.dial_client("a:1").await.unwrap();
        assert_eq!(client.run(1, b"x".to_vec()).await.unwrap(), b"x".to_vec());
        assert_eq!(network.dial_count(), 1);

        server.close().await.unwrap();
        let err = client.run(1, vec![]).await.unwrap_err();
        assert!(matches!(err, RouterError::Transport(_)));

        client.close().await.unwrap();
        assert_eq!(client.run(1, vec![]).await, Err(RouterError::Closed));
    }

    #[tokio::test]
    async fn test_dial_unknown_address() {
        let network = LocalNetwork::new();
        let err = network.dial_client("nowhere:1").await.err().unwrap();
        assert_eq!(err.error_type(), "dial");
        assert_eq!(network.dial_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_server() {
        let network = LocalNetwork::new();
        let _server = network.register_server("a:1", echo()).await.unwrap();
        let err = network.register_server("a:1", echo()).await.err().unwrap();
        assert_eq!(err.error_type(), "transport");
    }

    #[tokio::test]
    async fn test_errors_use_wire_encoding() {
        let network = LocalNetwork::new();
        let failing: Arc<dyn Runner> = Arc::new(FnRunner::new(|_, _input: Vec<u8>| async move {
            Err(RouterError::Closed)
        }));
        let _server = network.register_server("a:1", failing).await.unwrap();

        let client = network.dial_client("a:1").await.unwrap();
        // A remote shutdown does not look like a local one
        assert!(matches!(
            client.run(1, vec![]).await,
            Err(RouterError::Remote(_))
        ));
    }
}
