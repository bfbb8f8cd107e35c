use anyhow::{Context, Result};
use redis::aio::{ConnectionManager, PubSub};
use redis::{Client, RedisResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Redis handle shared by the session store and the event bus.
///
/// Commands go through the multiplexed connection manager; pub/sub needs a
/// dedicated connection which is opened from the underlying client.
#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    manager: SharedConnectionManager,
}

impl RedisClient {
    /// Connects and verifies the server with a PING, giving up after `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = Client::open(url).context("failed to parse REDIS_URL connection string")?;

        let mut manager = tokio::time::timeout(connect_timeout, ConnectionManager::new(client.clone()))
            .await
            .context("timed out connecting to Redis")?
            .context("failed to initialize Redis connection manager")?;

        tokio::time::timeout(
            connect_timeout,
            redis::cmd("PING").query_async::<_, String>(&mut manager),
        )
        .await
        .context("timed out waiting for Redis PING")?
        .context("Redis PING failed")?;

        Ok(Self {
            client,
            manager: Arc::new(Mutex::new(manager)),
        })
    }

    pub async fn get_multiplexed_async_connection(&self) -> RedisResult<ConnectionManager> {
        let guard = self.manager.lock().await;
        Ok(guard.clone())
    }

    /// Opens a dedicated pub/sub connection.
    pub async fn pubsub(&self) -> RedisResult<PubSub> {
        self.client.get_async_pubsub().await
    }
}
