//! Routing error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while routing, forwarding or serving a request
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterError {
    /// The transport could not establish a channel to the target address
    #[error("Dial error: {0}")]
    Dial(String),

    /// The membership source could not be queried or updated
    #[error("Registry error: {0}")]
    Registry(String),

    /// The request landed on a node that does not own its hash
    #[error("incorrect partition, retry later")]
    IncorrectPartition,

    /// The remote handler failed
    #[error("Remote error: {0}")]
    Remote(String),

    /// The router (or one of its resources) has been closed
    #[error("Router closed")]
    Closed,

    #[error("Timeout: {0}")]
    Timeout(String),

    /// The membership snapshot was empty so no owner could be picked
    #[error("No endpoints registered")]
    NoEndpoints,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Get the error type as a string for metrics labeling
    pub fn error_type(&self) -> &'static str {
        match self {
            RouterError::Dial(_) => "dial",
            RouterError::Registry(_) => "registry",
            RouterError::IncorrectPartition => "incorrect_partition",
            RouterError::Remote(_) => "remote",
            RouterError::Closed => "closed",
            RouterError::Timeout(_) => "timeout",
            RouterError::NoEndpoints => "no_endpoints",
            RouterError::Transport(_) => "transport",
            RouterError::Tls(_) => "tls",
            RouterError::Serialization(_) => "serialization",
            RouterError::Config(_) => "config",
            RouterError::Internal(_) => "internal",
        }
    }

    /// Whether the whole routing decision may succeed if retried later.
    ///
    /// Partition mismatches and missing endpoints are expected while the
    /// membership view converges after a topology change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouterError::IncorrectPartition
                | RouterError::NoEndpoints
                | RouterError::Dial(_)
                | RouterError::Timeout(_)
        )
    }

    /// Whether the failure means the underlying connection is unusable
    pub(crate) fn is_connection_failure(&self) -> bool {
        matches!(self, RouterError::Transport(_) | RouterError::Closed)
    }
}

/// Error code carried explicitly in a reply so the kind survives the hop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    IncorrectPartition,
    NoEndpoints,
    Registry,
    Closed,
    Timeout,
    Remote,
}

/// Error as it travels inside a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&RouterError> for WireError {
    fn from(err: &RouterError) -> Self {
        let code = match err {
            RouterError::IncorrectPartition => ErrorCode::IncorrectPartition,
            RouterError::NoEndpoints => ErrorCode::NoEndpoints,
            RouterError::Registry(_) => ErrorCode::Registry,
            RouterError::Closed => ErrorCode::Closed,
            RouterError::Timeout(_) => ErrorCode::Timeout,
            _ => ErrorCode::Remote,
        };
        WireError {
            code,
            message: err.to_string(),
        }
    }
}

impl From<WireError> for RouterError {
    fn from(err: WireError) -> Self {
        match err.code {
            ErrorCode::IncorrectPartition => RouterError::IncorrectPartition,
            ErrorCode::NoEndpoints => RouterError::NoEndpoints,
            ErrorCode::Registry => RouterError::Registry(err.message),
            // A remote shutdown does not close this router
            ErrorCode::Closed => RouterError::Remote(err.message),
            ErrorCode::Timeout => RouterError::Timeout(err.message),
            ErrorCode::Remote => RouterError::Remote(err.message),
        }
    }
}

impl From<std::io::Error> for RouterError {
    fn from(err: std::io::Error) -> Self {
        RouterError::Transport(err.to_string())
    }
}

impl From<bincode::Error> for RouterError {
    fn from(err: bincode::Error) -> Self {
        RouterError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for RouterError {
    fn from(err: redis::RedisError) -> Self {
        RouterError::Registry(err.to_string())
    }
}

impl From<tarpc::client::RpcError> for RouterError {
    fn from(err: tarpc::client::RpcError) -> Self {
        match err {
            tarpc::client::RpcError::DeadlineExceeded => {
                RouterError::Timeout("request deadline exceeded".to_string())
            }
            other => RouterError::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;

/// Collects failures from a best-effort sequence of releases
#[derive(Debug, Default)]
pub(crate) struct ErrorList(Vec<RouterError>);

impl ErrorList {
    pub(crate) fn check(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.0.push(e);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// First failure wins; the rest have already been logged by the caller
    pub(crate) fn into_result(self) -> Result<()> {
        match self.0.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
