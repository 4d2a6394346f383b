//! Ownership check in front of a node's handler
//!
//! Every inbound forwarded request is re-checked against the local
//! membership view. A node that does not think it owns the hash asks the
//! registry for a fresh listing once before rejecting, which absorbs the
//! usual propagation lag between peers.

use crate::error::{Result, RouterError};
use crate::metrics::{record_partition_recheck, record_partition_rejection};
use crate::picker::Picker;
use crate::registry::EndpointRegistry;
use crate::types::Runner;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct PartitionGuard {
    addr: String,
    registry: Arc<dyn EndpointRegistry>,
    picker: Arc<dyn Picker>,
    handler: Arc<dyn Runner>,
}

impl PartitionGuard {
    pub fn new(
        addr: impl Into<String>,
        registry: Arc<dyn EndpointRegistry>,
        picker: Arc<dyn Picker>,
        handler: Arc<dyn Runner>,
    ) -> Self {
        Self {
            addr: addr.into(),
            registry,
            picker,
            handler,
        }
    }

    async fn owner(&self, hash: u64, refresh: bool) -> Result<Option<String>> {
        let endpoints = self.registry.list_endpoints(refresh).await?;
        Ok(self.picker.pick(&endpoints, hash))
    }

    async fn owns(&self, hash: u64) -> Result<bool> {
        if self.owner(hash, false).await?.as_deref() == Some(self.addr.as_str()) {
            return Ok(true);
        }

        record_partition_recheck();
        debug!(hash, addr = %self.addr, "Not the owner in cached view, refreshing");
        match self.owner(hash, true).await {
            Ok(owner) if owner.as_deref() == Some(self.addr.as_str()) => Ok(true),
            Ok(owner) => {
                warn!(
                    hash,
                    addr = %self.addr,
                    owner = owner.as_deref().unwrap_or(""),
                    "Rejecting request for a partition owned elsewhere"
                );
                Ok(false)
            }
            Err(e) => {
                warn!(hash, addr = %self.addr, error = %e, "Refreshed ownership check failed");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl Runner for PartitionGuard {
    async fn run(&self, hash: u64, input: Vec<u8>) -> Result<Vec<u8>> {
        if !self.owns(hash).await? {
            record_partition_rejection();
            return Err(RouterError::IncorrectPartition);
        }
        self.handler.run(hash, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picker::RendezvousPicker;
    use crate::registry::MemoryRegistry;
    use crate::types::FnRunner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn guard(registry: MemoryRegistry, addr: &str, calls: Arc<AtomicUsize>) -> PartitionGuard {
        PartitionGuard::new(
            addr,
            Arc::new(registry),
            Arc::new(RendezvousPicker::new()),
            Arc::new(FnRunner::new(move |_, input: Vec<u8>| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(input)
                }
            })),
        )
    }

    #[tokio::test]
    async fn test_sole_owner_executes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let guard = guard(
            MemoryRegistry::with_endpoints(vec!["a:1".into()]),
            "a:1",
            calls.clone(),
        );
        assert_eq!(guard.run(7, b"x".to_vec()).await.unwrap(), b"x".to_vec());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_owner_rejects() {
        let calls = Arc::new(AtomicUsize::new(0));
        let guard = guard(
            MemoryRegistry::with_endpoints(vec!["b:2".into()]),
            "a:1",
            calls.clone(),
        );
        assert_eq!(
            guard.run(7, b"x".to_vec()).await,
            Err(RouterError::IncorrectPartition)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_view_rejects() {
        let calls = Arc::new(AtomicUsize::new(0));
        let guard = guard(MemoryRegistry::new(), "a:1", calls.clone());
        assert_eq!(
            guard.run(7, vec![]).await,
            Err(RouterError::IncorrectPartition)
        );
    }
}
