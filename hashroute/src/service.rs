//! tarpc service definition for inter-node forwarding
//!
//! A forwarded call carries the routing hash next to the opaque payload so
//! the receiving node can re-check ownership before executing it.

use crate::types::{RunReply, RunRequest};

/// Partition RPC service spoken by the TCP and QUIC transports.
#[tarpc::service]
pub trait PartitionRpc {
    /// Execute a request on the receiving node.
    ///
    /// Failures travel inside the reply with an explicit code, so an
    /// incorrect-partition rejection is still recognizable on the caller.
    async fn run(request: RunRequest) -> RunReply;

    /// Liveness check answered with "pong"; clients send it when connecting
    async fn ping() -> String;
}
