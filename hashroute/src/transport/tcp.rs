//! tarpc over plain TCP

use super::Network;
use crate::client::RpcClient;
use crate::error::{Result, RouterError};
use crate::server::{RpcHandler, ServerHandle};
use crate::types::{Closer, RunCloser, Runner};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default network: one TCP connection per peer, length-delimited bincode frames
#[derive(Debug, Clone)]
pub struct TcpNetwork {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TcpNetwork {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }
}

#[async_trait]
impl Network for TcpNetwork {
    async fn dial_client(&self, addr: &str) -> Result<Arc<dyn RunCloser>> {
        debug!(addr = %addr, "Connecting to node");

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RouterError::Dial(format!("Connection to {} timed out", addr)))?
            .map_err(|e| RouterError::Dial(format!("Failed to connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        let client = RpcClient::spawn(addr, stream, self.request_timeout, None)
            .verified()
            .await?;
        info!(addr = %addr, "Connected to node");
        Ok(Arc::new(client))
    }

    async fn register_server(
        &self,
        addr: &str,
        handler: Arc<dyn Runner>,
    ) -> Result<Box<dyn Closer>> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RouterError::Transport(format!("Failed to bind {}: {}", addr, e)))?;
        let handler = RpcHandler::new(handler);

        Ok(Box::new(ServerHandle::spawn(addr, move |token| {
            accept_loop(listener, handler, token)
        })))
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

async fn accept_loop(listener: TcpListener, handler: RpcHandler, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Accepted connection");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    tokio::spawn(handler.clone().serve_stream(stream, token.child_token()));
                }
                Err(e) => warn!(error = %e, "Failed to accept connection"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FnRunner;

    fn free_addr() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    }

    fn network() -> TcpNetwork {
        TcpNetwork::new(Duration::from_secs(2), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_dial_and_run() {
        let addr = free_addr();
        let server = network()
            .register_server(
                &addr,
                Arc::new(FnRunner::new(|hash, _input: Vec<u8>| async move {
                    Ok(hash.to_be_bytes().to_vec())
                })),
            )
            .await
            .unwrap();

        let client = network().dial_client(&addr).await.unwrap();
        assert_eq!(client.run(42, vec![]).await.unwrap(), 42u64.to_be_bytes().to_vec());

        client.close().await.unwrap();
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let addr = free_addr();
        let err = network().dial_client(&addr).await.err().unwrap();
        assert_eq!(err.error_type(), "dial");
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let addr = free_addr();
        let handler: Arc<dyn Runner> =
            Arc::new(FnRunner::new(|_, input: Vec<u8>| async move { Ok(input) }));
        let server = network()
            .register_server(&addr, handler.clone())
            .await
            .unwrap();

        let err = network()
            .register_server(&addr, handler)
            .await
            .err()
            .unwrap();
        assert_eq!(err.error_type(), "transport");
        server.close().await.unwrap();
    }
}
