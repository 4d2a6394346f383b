//! Outbound RPC channel to a single peer
//!
//! Wraps a spawned tarpc client over any byte stream (a TCP socket or a
//! QUIC bidirectional stream) and exposes it as a [`RunCloser`].

use crate::error::{Result, RouterError};
use crate::service::PartitionRpcClient;
use crate::types::{Closer, RunRequest, Runner};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tarpc::client::Config as TarpcConfig;
use tarpc::context;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Connected client for one remote node
pub struct RpcClient {
    addr: String,
    client: RwLock<Option<PartitionRpcClient>>,
    connection: Option<quinn::Connection>,
    request_timeout: Duration,
}

impl RpcClient {
    /// Spawn the tarpc dispatch task over `stream`.
    ///
    /// `connection` is the QUIC connection owning the stream, closed along
    /// with the client.
    pub(crate) fn spawn<S>(
        addr: &str,
        stream: S,
        request_timeout: Duration,
        connection: Option<quinn::Connection>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let transport = tarpc::serde_transport::new(
            tokio_util::codec::Framed::new(
                stream,
                tarpc::tokio_util::codec::LengthDelimitedCodec::new(),
            ),
            tarpc::tokio_serde::formats::Bincode::default(),
        );
        let client = PartitionRpcClient::new(TarpcConfig::default(), transport).spawn();

        debug!(addr = %addr, "Spawned RPC client");
        Self {
            addr: addr.to_string(),
            client: RwLock::new(Some(client)),
            connection,
            request_timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Create a context with the configured request timeout
    fn context(&self) -> context::Context {
        let mut ctx = context::current();
        ctx.deadline = Instant::now() + self.request_timeout;
        ctx
    }

    fn client(&self) -> Result<PartitionRpcClient> {
        self.client.read().clone().ok_or(RouterError::Closed)
    }

    /// Ping the remote node
    pub async fn ping(&self) -> Result<String> {
        let client = self.client()?;
        Ok(client.ping(self.context()).await?)
    }

    /// Confirm the peer answers the partition service before handing out
    /// the client
    pub(crate) async fn verified(self) -> Result<Self> {
        match self.ping().await {
            Ok(_) => Ok(self),
            Err(e) => {
                self.close().await?;
                Err(RouterError::Dial(format!(
                    "Node at {} did not answer ping: {}",
                    self.addr, e
                )))
            }
        }
    }
}

#[async_trait]
impl Runner for RpcClient {
    async fn run(&self, hash: u64, input: Vec<u8>) -> Result<Vec<u8>> {
        let client = self.client()?;
        let reply = client
            .run(
                self.context(),
                RunRequest {
                    hash,
                    payload: input,
                },
            )
            .await?;
        reply.into_result()
    }
}

#[async_trait]
impl Closer for RpcClient {
    async fn close(&self) -> Result<()> {
        // Dropping the last tarpc handle ends the dispatch task
        let client = self.client.write().take();
        if client.is_none() {
            return Ok(());
        }

        if let Some(connection) = &self.connection {
            connection.close(0u32.into(), b"client closed");
        }
        debug!(addr = %self.addr, "Closed RPC client");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_client_rejects_calls() {
        let (local, _remote) = tokio::io::duplex(1024);
        let client = RpcClient::spawn("peer:1", local, Duration::from_secs(1), None);
        assert_eq!(client.addr(), "peer:1");

        client.close().await.unwrap();
        client.close().await.unwrap();
        assert_eq!(client.run(1, vec![]).await, Err(RouterError::Closed));
    }

    #[tokio::test]
    async fn test_deadline_maps_to_timeout() {
        // Nothing answers on the other end of the pipe
        let (local, _remote) = tokio::io::duplex(1024);
        let client = RpcClient::spawn("peer:1", local, Duration::from_millis(50), None);

        let err = client.run(1, b"x".to_vec()).await.unwrap_err();
        assert_eq!(err.error_type(), "timeout");
    }

    #[tokio::test]
    async fn test_silent_peer_fails_verification() {
        let (local, _remote) = tokio::io::duplex(1024);
        let client = RpcClient::spawn("peer:1", local, Duration::from_millis(50), None);

        let err = client.verified().await.err().unwrap();
        assert_eq!(err.error_type(), "dial");
    }
}
