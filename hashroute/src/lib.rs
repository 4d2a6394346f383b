//! hashroute - Partition routing for clustered services
//!
//! Every node of a cluster runs a [`Router`]. For each request the router
//! asks the membership source for the live nodes, lets a [`Picker`] choose
//! the node owning the request hash, and either runs the request on the
//! local handler or forwards it to the owner over the network.
//!
//! # Architecture
//!
//! - **Picker**: rendezvous hashing or a consistent hash ring
//! - **Registry**: membership source (in-memory, Redis with heartbeats, caching wrapper)
//! - **Transport**: tarpc over TCP or QUIC, or in-process dispatch
//! - **Guard**: re-checks ownership of inbound requests before running them
//! - **Router**: routing entry point, connection cache and lifecycle
//!
//! # Example
//!
//! ```no_run
//! use hashroute::{FnRunner, MemoryRegistry, Router, RouterOptions, Runner, Closer};
//! use std::sync::Arc;
//!
//! # async fn example() -> hashroute::Result<()> {
//! let registry = MemoryRegistry::new();
//! let handler: Arc<dyn Runner> =
//!     Arc::new(FnRunner::new(|_hash, input: Vec<u8>| async move { Ok(input) }));
//! let router = Router::new(
//!     "127.0.0.1:9090",
//!     Some(handler),
//!     RouterOptions::new(Arc::new(registry)),
//! )
//! .await?;
//!
//! let reply = router.run(42, b"hello".to_vec()).await?;
//! assert_eq!(reply, b"hello".to_vec());
//! router.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod picker;
pub mod registry;
pub mod service;
pub mod transport;
pub mod types;

mod cache;
mod client;
mod guard;
mod router;
mod server;

pub use client::RpcClient;
pub use config::{RouterConfig, RouterOptions, TlsConfig};
pub use error::{ErrorCode, Result, RouterError, WireError};
pub use guard::PartitionGuard;
pub use picker::{HashRing, Picker, PickerConfig, RendezvousPicker};
pub use registry::{
    CachingRegistry, EndpointRegistry, MemoryRegistry, RedisRegistry, RegistryConfig,
};
pub use router::Router;
pub use service::PartitionRpcClient;
pub use transport::{LocalNetwork, Network, QuicNetwork, TcpNetwork, TransportConfig};
pub use types::*;
