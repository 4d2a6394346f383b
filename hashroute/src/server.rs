//! Inbound RPC serving
//!
//! Dispatches `PartitionRpc` calls to a [`Runner`]. The accept loops live
//! with each transport; this module owns what they share: the per-stream
//! tarpc channel and the handle that stops a running server.

use crate::error::Result;
use crate::metrics::HandlerTimer;
use crate::service::PartitionRpc;
use crate::types::{Closer, RunReply, RunRequest, Runner};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tarpc::context::Context;
use tarpc::server::{BaseChannel, Channel};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handler that implements the PartitionRpc service
#[derive(Clone)]
pub(crate) struct RpcHandler {
    handler: Arc<dyn Runner>,
}

impl RpcHandler {
    pub(crate) fn new(handler: Arc<dyn Runner>) -> Self {
        Self { handler }
    }

    /// Serve one stream until the peer hangs up or `token` is cancelled
    pub(crate) async fn serve_stream<S>(self, stream: S, token: CancellationToken)
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

        let serve = BaseChannel::with_defaults(transport)
            .execute(self.serve())
            .for_each(|response| async move {
                tokio::spawn(response);
            });

        tokio::select! {
            _ = serve => debug!("Stream closed by peer"),
            _ = token.cancelled() => debug!("Stream closed by server shutdown"),
        }
    }
}

impl PartitionRpc for RpcHandler {
    async fn run(self, _ctx: Context, request: RunRequest) -> RunReply {
        let timer = HandlerTimer::new();
        let result = self.handler.run(request.hash, request.payload).await;
        match &result {
            Ok(_) => timer.success(),
            Err(e) => {
                debug!(hash = request.hash, error = %e, "Handler failed");
                timer.error(e.error_type());
            }
        }
        RunReply::from_result(result)
    }

    async fn ping(self, _ctx: Context) -> String {
        "pong".to_string()
    }
}

/// Running server; closing it stops accepting and drops open streams
pub(crate) struct ServerHandle {
    addr: String,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerHandle {
    /// Spawn `accept_loop`, which must return once its token is cancelled
    pub(crate) fn spawn<F, Fut>(addr: &str, accept_loop: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let task = tokio::spawn(accept_loop(token.clone()));
        info!(addr = %addr, "Server started");

        Self {
            addr: addr.to_string(),
            token,
            task: Mutex::new(Some(task)),
        }
    }
}

#[async_trait]
impl Closer for ServerHandle {
    async fn close(&self) -> Result<()> {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };

        self.token.cancel();
        if let Err(e) = task.await {
            warn!(addr = %self.addr, error = %e, "Server task failed");
        }
        info!(addr = %self.addr, "Server stopped");
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
