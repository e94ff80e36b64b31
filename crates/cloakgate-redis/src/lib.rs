//! Redis-backed [`KeyValueStore`]: volatile keys with TTL plus pub/sub
//! broadcasts for blacklist and campaign cache invalidation.
//!
//! Commands go through a [`ConnectionManager`], which reconnects
//! transparently; callers treat any error as a cache miss per the
//! decision-path failure policy. Subscriptions use a dedicated connection
//! per channel, as the Redis protocol requires.

use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{info, warn};

use cloakgate_core::store::KeyValueStore;

pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect at startup. Failure here aborts boot — a half-configured
    /// shared store is worse than none.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .context("redis unreachable")?;
        info!("connected to redis");
        Ok(Self { client, manager })
    }
}

#[async_trait::async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let seconds = ttl.as_secs().max(1);
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(seconds)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.publish::<_, _, ()>(channel, message).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let connection = self
            .client
            .get_async_connection()
            .await
            .context("redis pubsub connection failed")?;
        let mut pubsub = connection.into_pubsub();
        pubsub
            .subscribe(channel)
            .await
            .context("redis subscribe failed")?;

        let (tx, rx) = mpsc::channel(64);
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(channel, error = %e, "undecodable pubsub payload dropped");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    // Receiver dropped; end the subscription task.
                    break;
                }
            }
            warn!(channel, "redis subscription stream ended");
        });
        Ok(rx)
    }
}
