//! Typed request multiplexing on top of hashroute
//!
//! A hashroute [`Router`] moves opaque bytes. This crate lets several
//! strongly typed handlers share one router: every request type implements
//! [`Request`], naming a stable kind and its response type, and the
//! [`Handlers`] returned by [`HandlersBuilder::start`] routes each call to
//! the node owning the request's partition hash.
//!
//! Requests travel as a bincode [`Envelope`] holding the kind and the
//! encoded request.
//!
//! # Example
//!
//! ```no_run
//! use hashroute::{MemoryRegistry, RouterOptions};
//! use hashroute_runner::{HandlersBuilder, Request};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Greet {
//!     user_id: u64,
//! }
//!
//! impl Request for Greet {
//!     const KIND: &'static str = "greet";
//!     type Response = String;
//!
//!     fn partition_hash(&self) -> u64 {
//!         self.user_id
//!     }
//! }
//!
//! # async fn example() -> Result<(), hashroute_runner::MuxError> {
//! let handlers = HandlersBuilder::new()
//!     .register(|req: Greet| async move { Ok(format!("hello {}", req.user_id)) })?
//!     .start("127.0.0.1:9090", RouterOptions::new(Arc::new(MemoryRegistry::new())))
//!     .await?;
//!
//! let reply = handlers.call(&Greet { user_id: 7 }).await?;
//! assert_eq!(reply, "hello 7");
//! handlers.stop().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use hashroute::{Closer, Router, RouterError, RouterOptions, Runner};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// A request type that can be routed by partition
pub trait Request: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identifier of this request type, identical on every node
    const KIND: &'static str;

    type Response: Serialize + DeserializeOwned + Send + 'static;

    /// Hash selecting the node that handles this request
    fn partition_hash(&self) -> u64;
}

/// Multiplexer errors
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("Handler already registered for kind '{0}'")]
    DuplicateKind(&'static str),

    #[error("No handler registered for kind '{0}'")]
    UnknownKind(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Router(#[from] RouterError),
}

impl From<bincode::Error> for MuxError {
    fn from(err: bincode::Error) -> Self {
        MuxError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;

/// Wire wrapper naming the handler of the encoded body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: String,
    pub body: Vec<u8>,
}

type ErasedHandler =
    Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, hashroute::Result<Vec<u8>>> + Send + Sync>;

/// Collects handlers before the router starts
#[derive(Default)]
pub struct HandlersBuilder {
    handlers: HashMap<&'static str, ErasedHandler>,
}

impl HandlersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for requests of type `R`
    pub fn register<R, F, Fut>(mut self, handler: F) -> Result<Self>
    where
        R: Request,
        F: Fn(R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = hashroute::Result<R::Response>> + Send + 'static,
    {
        if self.handlers.contains_key(R::KIND) {
            return Err(MuxError::DuplicateKind(R::KIND));
        }

        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(move |body: Vec<u8>| {
            let handler = handler.clone();
            async move {
                let request: R = bincode::deserialize(&body)?;
                let response = (*handler)(request).await?;
                Ok::<_, RouterError>(bincode::serialize(&response)?)
            }
            .boxed()
        });
        self.handlers.insert(R::KIND, erased);
        Ok(self)
    }

    /// Start a router serving the registered handlers at `addr`
    pub async fn start(self, addr: impl Into<String>, options: RouterOptions) -> Result<Handlers> {
        let kinds: HashSet<&'static str> = self.handlers.keys().copied().collect();
        let dispatcher: Arc<dyn Runner> = Arc::new(Dispatcher {
            handlers: self.handlers,
        });

        let router = Router::new(addr, Some(dispatcher), options).await?;
        info!(addr = %router.addr(), kinds = kinds.len(), "Handlers started");
        Ok(Handlers { router, kinds })
    }
}

/// Decodes envelopes and runs the matching handler
struct Dispatcher {
    handlers: HashMap<&'static str, ErasedHandler>,
}

#[async_trait]
impl Runner for Dispatcher {
    async fn run(&self, hash: u64, input: Vec<u8>) -> hashroute::Result<Vec<u8>> {
        let envelope: Envelope = bincode::deserialize(&input)?;
        let handler = self.handlers.get(envelope.kind.as_str()).ok_or_else(|| {
            RouterError::Internal(format!("No handler registered for kind '{}'", envelope.kind))
        })?;

        debug!(hash, kind = %envelope.kind, "Dispatching request");
        handler(envelope.body).await
    }
}

/// Running multiplexer
pub struct Handlers {
    router: Arc<Router>,
    kinds: HashSet<&'static str>,
}

impl Handlers {
    /// Route `request` to the owner of its partition and decode the reply
    pub async fn call<R: Request>(&self, request: &R) -> Result<R::Response> {
        if !self.kinds.contains(R::KIND) {
            return Err(MuxError::UnknownKind(R::KIND));
        }

        let envelope = Envelope {
            kind: R::KIND.to_string(),
            body: bincode::serialize(request)?,
        };
        let input = bincode::serialize(&envelope)?;
        let output = self.router.run(request.partition_hash(), input).await?;
        Ok(bincode::deserialize(&output)?)
    }

    /// The underlying router
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Close the router
    pub async fn stop(&self) -> Result<()> {
        Ok(self.router.close().await?)
    }
}
