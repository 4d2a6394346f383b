//! In-process endpoint registry
//!
//! Keeps the endpoint list in memory. Nodes sharing one `MemoryRegistry`
//! (it is cheap to clone) see each other immediately. Best for tests,
//! development and fixed single-process deployments.

use super::EndpointRegistry;
use crate::error::Result;
use crate::types::Closer;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared in-memory registry
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    endpoints: Arc<RwLock<Vec<String>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with `endpoints`
    pub fn with_endpoints(endpoints: Vec<String>) -> Self {
        let registry = Self::new();
        for endpoint in endpoints {
            registry.add_endpoint(&endpoint);
        }
        registry
    }

    /// Add an endpoint
    pub fn add_endpoint(&self, addr: &str) {
        let mut endpoints = self.endpoints.write();

        // Check for duplicates
        if endpoints.iter().any(|e| e == addr) {
            return;
        }
        endpoints.push(addr.to_string());
    }

    /// Remove an endpoint
    pub fn remove_endpoint(&self, addr: &str) {
        let mut endpoints = self.endpoints.write();
        if let Some(pos) = endpoints.iter().position(|e| e == addr) {
            endpoints.remove(pos);
        }
    }

    /// Current endpoints
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.read().clone()
    }
}

#[async_trait]
impl EndpointRegistry for MemoryRegistry {
    async fn register_endpoint(&self, addr: &str) -> Result<Box<dyn Closer>> {
        self.add_endpoint(addr);
        debug!(addr = %addr, "Registered endpoint");
        Ok(Box::new(MemoryRegistration {
            registry: self.clone(),
            addr: addr.to_string(),
            released: AtomicBool::new(false),
        }))
    }

    async fn list_endpoints(&self, _refresh: bool) -> Result<Vec<String>> {
        Ok(self.endpoints())
    }

    fn backend_name(&self) -> &'static str {
        "static"
    }
}

struct MemoryRegistration {
    registry: MemoryRegistry,
    addr: String,
    released: AtomicBool,
}

#[async_trait]
impl Closer for MemoryRegistration {
    async fn close(&self) -> Result<()> {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.registry.remove_endpoint(&self.addr);
            debug!(addr = %self.addr, "Deregistered endpoint");
        }
        Ok(())
    }
}
