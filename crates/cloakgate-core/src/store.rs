use std::time::{Duration, Instant};

use anyhow::Result;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::campaign::{BlacklistEntry, Campaign, Stream};
use crate::traffic::{MetricPoint, TrafficRecord};

/// Read side of the persistent campaign tables. The decision core never
/// writes campaigns — ownership stays with the admin surface.
#[async_trait::async_trait]
pub trait CampaignStore: Send + Sync + 'static {
    async fn campaign_by_slug(&self, slug: &str) -> Result<Option<Campaign>>;

    async fn campaign_by_id(&self, campaign_id: &str) -> Result<Option<Campaign>>;

    /// Active streams for the campaign with their targeting rules attached
    /// (single joined query on the backend).
    async fn streams_for_campaign(&self, campaign_id: &str) -> Result<Vec<Stream>>;

    async fn ping(&self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait BlacklistStore: Send + Sync + 'static {
    /// All currently-effective entries, for the hot-set refresh.
    async fn effective_entries(&self) -> Result<Vec<BlacklistEntry>>;

    async fn entry_for_ip(&self, ip: &str) -> Result<Option<BlacklistEntry>>;
}

/// Append-only sink target for traffic records and metric points.
#[async_trait::async_trait]
pub trait TrafficStore: Send + Sync + 'static {
    async fn append_traffic(&self, records: &[TrafficRecord]) -> Result<()>;

    async fn append_metrics(&self, points: &[MetricPoint]) -> Result<()>;
}

/// The Redis-shaped shared store: volatile keys with TTL plus a broadcast
/// channel for cache invalidation between peer processes.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    /// Subscribe to a broadcast channel. Messages published after this call
    /// arrive on the receiver; the subscription ends when it is dropped.
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>>;
}

/// In-process [`KeyValueStore`] used when Redis is not configured, and by
/// the test suites. Expiry is evaluated lazily at read time.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, (String, Option<Instant>)>,
    subscribers: DashMap<String, Vec<mpsc::Sender<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            let (value, deadline) = entry.value();
            match deadline {
                Some(deadline) if Instant::now() >= *deadline => {}
                _ => return Ok(Some(value.clone())),
            }
        } else {
            return Ok(None);
        }
        // Expired: drop the line outside the read guard.
        self.entries.remove(key);
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            (value.to_string(), Instant::now().checked_add(ttl)),
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        if let Some(mut senders) = self.subscribers.get_mut(channel) {
            senders.retain(|tx| tx.try_send(message.to_string()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
