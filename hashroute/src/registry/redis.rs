//! Redis-based endpoint registry
//!
//! Endpoints live in a sorted set `{prefix}endpoints` whose scores are
//! expiry times (unix seconds). A registered node renews its score every
//! `ttl / 3` until its handle is closed, so a node that dies without
//! deregistering drops out of every listing once its score expires.
//!
//! All clones of a registry share one reconnecting connection, opened on
//! the first command. Listings always go to Redis; wrap the registry in a
//! [`CachingRegistry`](super::CachingRegistry) to cache them.

use super::EndpointRegistry;
use crate::error::Result;
use crate::metrics::record_heartbeat_failure;
use crate::types::Closer;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Redis-based endpoint registry
#[derive(Clone)]
pub struct RedisRegistry {
    client: redis::Client,
    conn: Arc<OnceCell<ConnectionManager>>,
    key: String,
    ttl: Duration,
}

/// Reconnect attempts before a command fails
const CONNECT_RETRIES: usize = 2;

impl RedisRegistry {
    /// Create a registry for the Redis server at `url`.
    ///
    /// Does not connect until the first command.
    pub fn new(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: Arc::new(OnceCell::new()),
            key: format!("{}endpoints", prefix),
            ttl: Duration::from_secs(60),
        })
    }

    /// Set the liveness timeout (minimum one second)
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl.max(Duration::from_secs(1));
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Interval between heartbeat renewals
    pub fn heartbeat_interval(&self) -> Duration {
        self.ttl / 3
    }

    async fn get_connection(&self) -> Result<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| {
                let config = ConnectionManagerConfig::new().set_number_of_retries(CONNECT_RETRIES);
                self.client.get_connection_manager_with_config(config)
            })
            .await?;
        Ok(conn.clone())
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    async fn add_endpoint(&self, addr: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let expires = Self::now_secs() + self.ttl.as_secs();
        conn.zadd::<_, _, _, ()>(&self.key, addr, expires).await?;
        Ok(())
    }

    async fn remove_endpoint(&self, addr: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;
        conn.zrem::<_, _, ()>(&self.key, addr).await?;
        Ok(())
    }

    /// Remove endpoints whose registration has expired
    pub async fn purge_expired(&self) -> Result<usize> {
        let mut conn = self.get_connection().await?;
        let removed: usize = conn
            .zrembyscore(&self.key, "-inf", format!("({}", Self::now_secs()))
            .await?;
        if removed > 0 {
            info!(removed, key = %self.key, "Purged expired endpoints");
        }
        Ok(removed)
    }

    fn spawn_heartbeat(&self, addr: String, token: CancellationToken) -> JoinHandle<()> {
        let registry = self.clone();
        let period = self.heartbeat_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // Skip immediate tick

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        match registry.add_endpoint(&addr).await {
                            Ok(()) => debug!(addr = %addr, "Renewed endpoint registration"),
                            Err(e) => {
                                record_heartbeat_failure("redis");
                                warn!(addr = %addr, error = %e, "Failed to renew endpoint registration");
                            }
                        }
                    }
                }
            }

            debug!(addr = %addr, "Heartbeat stopped");
        })
    }
}

#[async_trait]
impl EndpointRegistry for RedisRegistry {
    async fn register_endpoint(&self, addr: &str) -> Result<Box<dyn Closer>> {
        self.add_endpoint(addr).await?;

        let token = CancellationToken::new();
        let task = self.spawn_heartbeat(addr.to_string(), token.clone());

        info!(
            addr = %addr,
            key = %self.key,
            ttl_secs = self.ttl.as_secs(),
            "Registered endpoint in Redis"
        );

        Ok(Box::new(RedisRegistration {
            registry: self.clone(),
            addr: addr.to_string(),
            token,
            task: Mutex::new(Some(task)),
        }))
    }

    async fn list_endpoints(&self, _refresh: bool) -> Result<Vec<String>> {
        let mut conn = self.get_connection().await?;
        let endpoints: Vec<String> = conn
            .zrangebyscore(&self.key, Self::now_secs(), "+inf")
            .await?;
        Ok(endpoints)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Registration handle; closing it stops the heartbeat and deregisters
struct RedisRegistration {
    registry: RedisRegistry,
    addr: String,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Closer for RedisRegistration {
    async fn close(&self) -> Result<()> {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return Ok(());
        };

        self.token.cancel();
        if let Err(e) = task.await {
            warn!(addr = %self.addr, error = %e, "Heartbeat task failed");
        }

        self.registry.remove_endpoint(&self.addr).await?;
        info!(addr = %self.addr, "Deregistered endpoint from Redis");
        Ok(())
    }
}

impl Drop for RedisRegistration {
    fn drop(&mut self) {
        // Without an explicit close the entry expires after the ttl
        self.token.cancel();
    }
}
