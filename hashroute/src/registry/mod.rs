//! Endpoint registries
//!
//! A registry keeps track of the live addresses in the cluster. Every node
//! registers its own address at startup and lists the others whenever it
//! needs to pick an owner for a hash.
//!
//! # Registry Backends
//!
//! - **Static**: in-process set seeded from configuration
//! - **Redis**: sorted set with expiring scores, renewed by a heartbeat
//! - **Caching**: wrapper serving `list_endpoints` from a short-lived cache
//!
//! # Example
//!
//! ```ignore
//! use hashroute::registry::RegistryConfig;
//!
//! let config = RegistryConfig::redis("redis://127.0.0.1/", "myservice_");
//! let registry = config.create_registry()?;
//!
//! let handle = registry.register_endpoint("10.0.0.1:9090").await?;
//! let endpoints = registry.list_endpoints(false).await?;
//!
//! // Deregister
//! handle.close().await?;
//! ```

mod caching;
mod memory;
mod redis;

pub use self::caching::CachingRegistry;
pub use self::memory::MemoryRegistry;
pub use self::redis::RedisRegistry;

use crate::error::Result;
use crate::types::Closer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Manages the live list of endpoints in a cluster
#[async_trait]
pub trait EndpointRegistry: Send + Sync {
    /// Publish `addr` as live. Closing the returned handle deregisters it.
    async fn register_endpoint(&self, addr: &str) -> Result<Box<dyn Closer>>;

    /// List live endpoints. `refresh` bypasses any client-side caching.
    async fn list_endpoints(&self, refresh: bool) -> Result<Vec<String>>;

    /// Get the registry backend name
    fn backend_name(&self) -> &'static str;
}

/// Registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum RegistryConfig {
    /// In-process registry seeded with a fixed list of nodes
    Static {
        /// Node addresses (host:port)
        #[serde(default)]
        nodes: Vec<String>,
    },

    /// Redis-backed registry
    Redis {
        /// Redis connection URL
        url: String,

        /// Key prefix, allowing several clusters to share one Redis
        #[serde(default = "default_prefix")]
        prefix: String,

        /// Liveness timeout in seconds
        #[serde(default = "default_ttl_secs")]
        ttl_secs: u64,

        /// Cache endpoint listings for this many milliseconds (0 disables)
        #[serde(default)]
        cache_ms: u64,
    },
}

fn default_prefix() -> String {
    "hashroute_".to_string()
}

fn default_ttl_secs() -> u64 {
    60
}

impl RegistryConfig {
    /// Create static registry configuration
    pub fn static_nodes<S: Into<String>>(nodes: Vec<S>) -> Self {
        RegistryConfig::Static {
            nodes: nodes.into_iter().map(|s| s.into()).collect(),
        }
    }

    /// Create Redis registry configuration
    pub fn redis(url: impl Into<String>, prefix: impl Into<String>) -> Self {
        RegistryConfig::Redis {
            url: url.into(),
            prefix: prefix.into(),
            ttl_secs: default_ttl_secs(),
            cache_ms: 0,
        }
    }

    /// Create the appropriate registry implementation
    pub fn create_registry(&self) -> Result<Arc<dyn EndpointRegistry>> {
        match self {
            RegistryConfig::Static { nodes } => {
                Ok(Arc::new(MemoryRegistry::with_endpoints(nodes.clone())))
            }
            RegistryConfig::Redis {
                url,
                prefix,
                ttl_secs,
                cache_ms,
            } => {
                let registry: Arc<dyn EndpointRegistry> = Arc::new(
                    RedisRegistry::new(url, prefix)?.with_ttl(Duration::from_secs(*ttl_secs)),
                );
                if *cache_ms > 0 {
                    Ok(Arc::new(CachingRegistry::new(
                        registry,
                        Duration::from_millis(*cache_ms),
                    )))
                } else {
                    Ok(registry)
                }
            }
        }
    }
}
