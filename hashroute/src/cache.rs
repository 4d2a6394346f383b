//! Connection cache keyed by peer address
//!
//! At most one live client exists per address. Concurrent callers for an
//! address without a client share a single dial; a failed dial is not
//! remembered, so the next caller dials again. The map lock is held only
//! for lookup and insertion, never across a dial. Dials in flight are
//! abandoned with `Closed` once the shutdown token fires.

use crate::error::{ErrorList, Result, RouterError};
use crate::metrics::{record_client_cache_size, record_dial};
use crate::transport::Network;
use crate::types::RunCloser;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Slot = Arc<OnceCell<Arc<dyn RunCloser>>>;

pub(crate) struct ClientCache {
    network: Arc<dyn Network>,
    connect_timeout: Duration,
    shutdown: CancellationToken,
    // None once closed
    slots: Mutex<Option<HashMap<String, Slot>>>,
}

impl ClientCache {
    pub(crate) fn new(
        network: Arc<dyn Network>,
        connect_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            network,
            connect_timeout,
            shutdown,
            slots: Mutex::new(Some(HashMap::new())),
        }
    }

    /// Get the client for `addr`, dialing it if needed
    pub(crate) async fn get(&self, addr: &str) -> Result<Arc<dyn RunCloser>> {
        let slot = {
            let mut slots = self.slots.lock();
            let slots = slots.as_mut().ok_or(RouterError::Closed)?;
            slots.entry(addr.to_string()).or_default().clone()
        };

        let mut dialed = false;
        let result = tokio::select! {
            _ = self.shutdown.cancelled() => Err(RouterError::Closed),
            result = slot.get_or_try_init(|| {
                dialed = true;
                self.dial(addr)
            }) => result.cloned(),
        };

        let client = match result {
            Ok(client) => client,
            Err(e) => {
                self.discard_empty(addr, &slot);
                return Err(e);
            }
        };

        // The cache may have been closed while the dial was in flight, or
        // the slot dropped by a failed dial racing this one
        let closed = {
            let mut slots = self.slots.lock();
            match slots.as_mut() {
                Some(slots) => {
                    slots.entry(addr.to_string()).or_insert_with(|| slot.clone());
                    false
                }
                None => true,
            }
        };
        if closed {
            if let Err(e) = client.close().await {
                debug!(addr = %addr, error = %e, "Failed to close client dialed during shutdown");
            }
            return Err(RouterError::Closed);
        }
        if dialed {
            record_client_cache_size(self.len());
        }
        Ok(client)
    }

    /// Forget the slot for `addr` if no dial ever filled it
    fn discard_empty(&self, addr: &str, slot: &Slot) {
        let mut slots = self.slots.lock();
        let Some(slots) = slots.as_mut() else {
            return;
        };
        let empty = slots
            .get(addr)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized());
        if empty {
            slots.remove(addr);
        }
    }

    /// Number of addresses with a slot, dialed or not
    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().as_ref().map_or(0, HashMap::len)
    }

    async fn dial(&self, addr: &str) -> Result<Arc<dyn RunCloser>> {
        let result = match tokio::time::timeout(self.connect_timeout, self.network.dial_client(addr))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(RouterError::Dial(format!("Dial to {} timed out", addr))),
        };

        record_dial(addr, result.is_ok());
        match &result {
            Ok(_) => debug!(addr = %addr, network = self.network.name(), "Dialed node"),
            Err(e) => warn!(addr = %addr, error = %e, "Failed to dial node"),
        }
        result
    }

    /// Drop and close the client for `addr` if it is still `client`
    pub(crate) async fn evict(&self, addr: &str, client: &Arc<dyn RunCloser>) {
        let removed = {
            let mut slots = self.slots.lock();
            let Some(slots) = slots.as_mut() else {
                return;
            };
            let current = slots
                .get(addr)
                .and_then(|slot| slot.get())
                .is_some_and(|c| Arc::ptr_eq(c, client));
            if current {
                slots.remove(addr)
            } else {
                None
            }
        };

        if removed.is_some() {
            debug!(addr = %addr, "Evicted client");
            record_client_cache_size(self.len());
            if let Err(e) = client.close().await {
                debug!(addr = %addr, error = %e, "Failed to close evicted client");
            }
        }
    }

    /// Number of connected clients
    pub(crate) fn len(&self) -> usize {
        self.slots
            .lock()
            .as_ref()
            .map(|slots| slots.values().filter(|slot| slot.initialized()).count())
            .unwrap_or(0)
    }

    /// Close every client and refuse further use
    pub(crate) async fn close(&self) -> Result<()> {
        let slots = self.slots.lock().take();
        let Some(slots) = slots else {
            return Ok(());
        };

        let mut errs = ErrorList::default();
        for (addr, slot) in slots {
            if let Some(client) = slot.get() {
                let result = client.close().await;
                if let Err(e) = &result {
                    warn!(addr = %addr, error = %e, "Failed to close client");
                }
                errs.check(result);
            }
        }
        record_client_cache_size(0);
        errs.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalNetwork;
    use crate::types::{Closer, FnRunner, Runner};
    use async_trait::async_trait;
    use std::time::Instant;

    /// Network whose dials never finish in time
    struct StalledNetwork;

    #[async_trait]
    impl Network for StalledNetwork {
        async fn dial_client(&self, addr: &str) -> Result<Arc<dyn RunCloser>> {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Err(RouterError::Dial(format!("No server listening at {}", addr)))
        }

        async fn register_server(
            &self,
            _addr: &str,
            _handler: Arc<dyn Runner>,
        ) -> Result<Box<dyn Closer>> {
            Err(RouterError::Internal("stalled network cannot serve".into()))
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    async fn network_with(addrs: &[&str]) -> (LocalNetwork, Vec<Box<dyn Closer>>) {
        let network = LocalNetwork::new();
        let mut servers = Vec::new();
        for addr in addrs {
            let handler: Arc<dyn Runner> =
                Arc::new(FnRunner::new(|_, input: Vec<u8>| async move { Ok(input) }));
            servers.push(network.register_server(addr, handler).await.unwrap());
        }
        (network, servers)
    }

    #[tokio::test]
    async fn test_reuses_client() {
        let (network, _servers) = network_with(&["a:1"]).await;
        let cache = ClientCache::new(Arc::new(network.clone()), Duration::from_secs(1), CancellationToken::new());

        let first = cache.get("a:1").await.unwrap();
        let second = cache.get("a:1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(network.dial_count(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_dial_is_retried() {
        let (network, _servers) = network_with(&[]).await;
        let cache = ClientCache::new(Arc::new(network.clone()), Duration::from_secs(1), CancellationToken::new());

        assert!(matches!(cache.get("a:1").await, Err(RouterError::Dial(_))));
        assert!(matches!(cache.get("b:2").await, Err(RouterError::Dial(_))));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.slot_count(), 0);

        let handler: Arc<dyn Runner> =
            Arc::new(FnRunner::new(|_, input: Vec<u8>| async move { Ok(input) }));
        let _server = network.register_server("a:1", handler).await.unwrap();
        assert!(cache.get("a:1").await.is_ok());
        assert_eq!(network.dial_count(), 2);
    }

    #[tokio::test]
    async fn test_evict_only_current_client() {
        let (network, _servers) = network_with(&["a:1"]).await;
        let cache = ClientCache::new(Arc::new(network.clone()), Duration::from_secs(1), CancellationToken::new());

        let old = cache.get("a:1").await.unwrap();
        cache.evict("a:1", &old).await;
        assert_eq!(cache.len(), 0);

        let fresh = cache.get("a:1").await.unwrap();
        // A stale eviction leaves the fresh client alone
        cache.evict("a:1", &old).await;
        assert_eq!(cache.len(), 1);
        assert!(fresh.run(1, b"x".to_vec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_cache() {
        let (network, _servers) = network_with(&["a:1"]).await;
        let cache = ClientCache::new(Arc::new(network), Duration::from_secs(1), CancellationToken::new());

        let client = cache.get("a:1").await.unwrap();
        cache.close().await.unwrap();
        cache.close().await.unwrap();

        assert_eq!(client.run(1, vec![]).await, Err(RouterError::Closed));
        assert!(matches!(cache.get("a:1").await, Err(RouterError::Closed)));
    }

    #[tokio::test]
    async fn test_shutdown_abandons_dial() {
        let shutdown = CancellationToken::new();
        let cache = Arc::new(ClientCache::new(
            Arc::new(StalledNetwork),
            Duration::from_secs(10),
            shutdown.clone(),
        ));

        let started = Instant::now();
        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("a:1").await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let result = pending.await.unwrap();
        assert_eq!(result, Err(RouterError::Closed));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(cache.slot_count(), 0);
    }
}
