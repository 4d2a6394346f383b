//! Caching wrapper for endpoint registries
//!
//! Serves `list_endpoints(false)` from a cached snapshot younger than
//! `max_age`. `list_endpoints(true)` always goes to the wrapped registry and
//! refills the cache, which is what the partition guard relies on to
//! absorb propagation lag.

use super::EndpointRegistry;
use crate::error::Result;
use crate::types::Closer;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Snapshot {
    fetched_at: Instant,
    endpoints: Vec<String>,
}

/// Registry wrapper caching endpoint listings
pub struct CachingRegistry {
    inner: Arc<dyn EndpointRegistry>,
    max_age: Duration,
    snapshot: Mutex<Option<Snapshot>>,
}

impl CachingRegistry {
    pub fn new(inner: Arc<dyn EndpointRegistry>, max_age: Duration) -> Self {
        Self {
            inner,
            max_age,
            snapshot: Mutex::new(None),
        }
    }

    /// Drop the cached snapshot
    pub fn invalidate(&self) {
        *self.snapshot.lock() = None;
    }

    fn cached(&self) -> Option<Vec<String>> {
        let snapshot = self.snapshot.lock();
        snapshot
            .as_ref()
            .filter(|s| s.fetched_at.elapsed() < self.max_age)
            .map(|s| s.endpoints.clone())
    }
}

#[async_trait]
impl EndpointRegistry for CachingRegistry {
    async fn register_endpoint(&self, addr: &str) -> Result<Box<dyn Closer>> {
        let handle = self.inner.register_endpoint(addr).await?;
        self.invalidate();
        Ok(handle)
    }

    async fn list_endpoints(&self, refresh: bool) -> Result<Vec<String>> {
        if !refresh {
            if let Some(endpoints) = self.cached() {
                return Ok(endpoints);
            }
        }

        let endpoints = self.inner.list_endpoints(true).await?;
        *self.snapshot.lock() = Some(Snapshot {
            fetched_at: Instant::now(),
            endpoints: endpoints.clone(),
        });
        Ok(endpoints)
    }

    fn backend_name(&self) -> &'static str {
        "caching"
    }
}
