//! Routing state of one node
//!
//! A [`Router`] picks the owner of each hash from the current membership
//! and forwards the request there, or runs it on the local handler when
//! this node is the owner. A router built with a handler also serves
//! forwarded requests (behind a [`PartitionGuard`]) and registers its
//! address with the membership source.

use crate::cache::ClientCache;
use crate::config::RouterOptions;
use crate::error::{ErrorList, Result, RouterError};
use crate::guard::PartitionGuard;
use crate::metrics::{record_local_execution, ForwardTimer};
use crate::picker::Picker;
use crate::registry::EndpointRegistry;
use crate::types::{Closer, Runner};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resources acquired at initialization, released on close
#[derive(Default)]
struct Handles {
    registration: Option<Box<dyn Closer>>,
    server: Option<Box<dyn Closer>>,
}

impl Handles {
    /// Release registration then server, attempting both
    async fn release(self, addr: &str, errs: &mut ErrorList) {
        if let Some(registration) = self.registration {
            let result = registration.close().await;
            if let Err(e) = &result {
                warn!(addr = %addr, error = %e, "Failed to deregister endpoint");
            }
            errs.check(result);
        }
        if let Some(server) = self.server {
            let result = server.close().await;
            if let Err(e) = &result {
                warn!(addr = %addr, error = %e, "Failed to stop server");
            }
            errs.check(result);
        }
    }
}

/// Partition router for one node
pub struct Router {
    addr: String,
    handler: Option<Arc<dyn Runner>>,
    registry: Arc<dyn EndpointRegistry>,
    picker: Arc<dyn Picker>,
    clients: ClientCache,
    request_timeout: Duration,
    shutdown: CancellationToken,
    handles: Mutex<Option<Handles>>,
}

impl Router {
    /// Initialize a router for the node at `addr`.
    ///
    /// With a handler, starts the inbound server at `addr` and then
    /// registers `addr` with the membership source. Without one the router
    /// only forwards. On failure everything acquired so far is released.
    pub async fn new(
        addr: impl Into<String>,
        handler: Option<Arc<dyn Runner>>,
        options: RouterOptions,
    ) -> Result<Arc<Self>> {
        let addr = addr.into();
        let mut handles = Handles::default();

        if let Some(handler) = &handler {
            if let Err(e) = Self::acquire(&addr, handler, &options, &mut handles).await {
                let mut errs = ErrorList::default();
                handles.release(&addr, &mut errs).await;
                if errs.len() > 0 {
                    warn!(addr = %addr, failures = errs.len(), "Cleanup after failed initialization was incomplete");
                }
                return Err(e);
            }
        }

        info!(
            addr = %addr,
            serving = handler.is_some(),
            picker = options.picker.name(),
            network = options.network.name(),
            registry = options.registry.backend_name(),
            "Router started"
        );

        let shutdown = CancellationToken::new();
        Ok(Arc::new(Self {
            clients: ClientCache::new(options.network, options.connect_timeout, shutdown.clone()),
            addr,
            handler,
            registry: options.registry,
            picker: options.picker,
            request_timeout: options.request_timeout,
            shutdown,
            handles: Mutex::new(Some(handles)),
        }))
    }

    async fn acquire(
        addr: &str,
        handler: &Arc<dyn Runner>,
        options: &RouterOptions,
        handles: &mut Handles,
    ) -> Result<()> {
        let guard = PartitionGuard::new(
            addr,
            options.registry.clone(),
            options.picker.clone(),
            handler.clone(),
        );
        handles.server = Some(options.network.register_server(addr, Arc::new(guard)).await?);
        handles.registration = Some(options.registry.register_endpoint(addr).await?);
        Ok(())
    }

    /// Address of this node
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Current owner of `hash`, if any node is registered
    pub async fn owner(&self, hash: u64) -> Result<Option<String>> {
        let endpoints = self.registry.list_endpoints(false).await?;
        Ok(self.picker.pick(&endpoints, hash))
    }

    /// Number of open connections to other nodes
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn forward(&self, owner: &str, hash: u64, input: Vec<u8>) -> Result<Vec<u8>> {
        let client = self.clients.get(owner).await?;

        let result = tokio::select! {
            _ = self.shutdown.cancelled() => Err(RouterError::Closed),
            result = tokio::time::timeout(self.request_timeout, client.run(hash, input)) => {
                result.unwrap_or_else(|_| {
                    Err(RouterError::Timeout(format!("Request to {} timed out", owner)))
                })
            }
        };

        if let Err(e) = &result {
            if e.is_connection_failure() && !self.is_closed() {
                self.clients.evict(owner, &client).await;
            }
        }
        result
    }
}

#[async_trait]
impl Runner for Router {
    async fn run(&self, hash: u64, input: Vec<u8>) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(RouterError::Closed);
        }

        let owner = self.owner(hash).await?.ok_or(RouterError::NoEndpoints)?;

        if owner == self.addr {
            if let Some(handler) = &self.handler {
                record_local_execution();
                debug!(hash, "Executing locally");
                return handler.run(hash, input).await;
            }
        }

        let timer = ForwardTimer::new(&owner);
        debug!(hash, owner = %owner, "Forwarding request");
        match self.forward(&owner, hash, input).await {
            Ok(output) => {
                timer.success();
                Ok(output)
            }
            Err(e) => {
                timer.error(e.error_type());
                debug!(hash, owner = %owner, error = %e, "Forward failed");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Closer for Router {
    async fn close(&self) -> Result<()> {
        let handles = self.handles.lock().take();
        let Some(handles) = handles else {
            return Ok(());
        };

        self.shutdown.cancel();
        let mut errs = ErrorList::default();
        errs.check(self.clients.close().await);
        handles.release(&self.addr, &mut errs).await;

        if errs.len() > 0 {
            warn!(addr = %self.addr, failures = errs.len(), "Router closed with errors");
        } else {
            info!(addr = %self.addr, "Router closed");
        }
        errs.into_result()
    }
}
