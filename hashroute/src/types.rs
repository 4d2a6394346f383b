//! Core capabilities shared by the router, the guard and the transports

use crate::error::{Result, RouterError, WireError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Executes a single request with the specified hash
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, hash: u64, input: Vec<u8>) -> Result<Vec<u8>>;
}

/// Releases a resource such as a registration, a server or a connection
#[async_trait]
pub trait Closer: Send + Sync {
    async fn close(&self) -> Result<()>;
}

/// A runner that owns a closeable resource, e.g. a connection to a peer
pub trait RunCloser: Runner + Closer {}

impl<T: Runner + Closer + ?Sized> RunCloser for T {}

#[async_trait]
impl<T: Runner + ?Sized> Runner for Arc<T> {
    async fn run(&self, hash: u64, input: Vec<u8>) -> Result<Vec<u8>> {
        (**self).run(hash, input).await
    }
}

/// Adapts an async closure into a [`Runner`]
pub struct FnRunner<F>(F);

impl<F, Fut> FnRunner<F>
where
    F: Fn(u64, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>>> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Runner for FnRunner<F>
where
    F: Fn(u64, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>>> + Send,
{
    async fn run(&self, hash: u64, input: Vec<u8>) -> Result<Vec<u8>> {
        (self.0)(hash, input).await
    }
}

/// A closer with nothing to release
pub struct NoopCloser;

#[async_trait]
impl Closer for NoopCloser {
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Request as it travels over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub hash: u64,
    pub payload: Vec<u8>,
}

/// Reply as it travels over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReply {
    pub payload: Vec<u8>,
    pub error: Option<WireError>,
}

impl RunReply {
    /// Build a reply from a handler result
    pub fn from_result(result: Result<Vec<u8>>) -> Self {
        match result {
            Ok(payload) => RunReply {
                payload,
                error: None,
            },
            Err(e) => RunReply {
                payload: Vec::new(),
                error: Some(WireError::from(&e)),
            },
        }
    }

    /// Turn a received reply back into a result
    pub fn into_result(self) -> Result<Vec<u8>> {
        match self.error {
            Some(err) => Err(RouterError::from(err)),
            None => Ok(self.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_runner() {
        let runner = FnRunner::new(|hash, mut input: Vec<u8>| async move {
            input.push(hash as u8);
            Ok(input)
        });
        assert_eq!(runner.run(7, vec![1]).await.unwrap(), vec![1, 7]);
    }

    #[test]
    fn test_reply_preserves_partition_error() {
        let reply = RunReply::from_result(Err(RouterError::IncorrectPartition));
        assert_eq!(reply.into_result(), Err(RouterError::IncorrectPartition));
    }

    #[test]
    fn test_reply_success() {
        let reply = RunReply::from_result(Ok(b"ok".to_vec()));
        assert!(reply.error.is_none());
        assert_eq!(reply.into_result().unwrap(), b"ok".to_vec());
    }
}
