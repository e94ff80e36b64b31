use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use cloakgate_core::campaign::BlacklistEntry;
use cloakgate_core::store::{BlacklistStore, KeyValueStore};

/// Pub/sub channel peers use to propagate blacklist writes.
pub const BLACKLIST_CHANNEL: &str = "cloakgate:blacklist";

const MISS_CACHE_TTL: Duration = Duration::from_secs(60);
const MISS_CACHE_CAPACITY: u64 = 100_000;

#[derive(Debug, Clone)]
pub struct BlacklistVerdict {
    pub blocked: bool,
    pub reason: Option<String>,
}

impl BlacklistVerdict {
    fn clear() -> Self {
        Self {
            blocked: false,
            reason: None,
        }
    }

    fn blocked(entry: &BlacklistEntry) -> Self {
        Self {
            blocked: true,
            reason: Some(entry.reason.clone()),
        }
    }
}

/// Invalidation event broadcast on [`BLACKLIST_CHANNEL`]. Adds carry the
/// full entry so peers can update their hot set without a store round-trip.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BlacklistInvalidation {
    Add { entry: BlacklistEntry },
    Remove { ip: String },
}

/// Two-tier blacklist index.
///
/// Tier 1 is an in-process map of the hot set, refreshed on a schedule via
/// copy-on-write swap and patched by pub/sub invalidations. Tier 2 is a
/// per-IP store lookup whose result is cached for a minute. Expiry is
/// evaluated at read time, so an expired entry stops blocking immediately.
///
/// Store failures fall back to tier 1: IPs already in the local deny list
/// stay blocked (fail-closed), unknown IPs pass (fail-open).
pub struct BlacklistChecker {
    store: Arc<dyn BlacklistStore>,
    kv: Arc<dyn KeyValueStore>,
    hot: RwLock<Arc<HashMap<String, BlacklistEntry>>>,
    miss_cache: Cache<String, BlacklistVerdict>,
}

impl BlacklistChecker {
    pub fn new(store: Arc<dyn BlacklistStore>, kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            kv,
            hot: RwLock::new(Arc::new(HashMap::new())),
            miss_cache: Cache::builder()
                .max_capacity(MISS_CACHE_CAPACITY)
                .time_to_live(MISS_CACHE_TTL)
                .build(),
        }
    }

    fn hot_snapshot(&self) -> Arc<HashMap<String, BlacklistEntry>> {
        match self.hot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn swap_hot(&self, map: HashMap<String, BlacklistEntry>) {
        let map = Arc::new(map);
        match self.hot.write() {
            Ok(mut guard) => *guard = map,
            Err(poisoned) => *poisoned.into_inner() = map,
        }
    }

    /// Rebuild the hot set from the store. Returns the entry count.
    pub async fn refresh(&self) -> anyhow::Result<usize> {
        let entries = self.store.effective_entries().await?;
        let map: HashMap<String, BlacklistEntry> = entries
            .into_iter()
            .map(|entry| (entry.ip.clone(), entry))
            .collect();
        let count = map.len();
        self.swap_hot(map);
        Ok(count)
    }

    /// Background loop: refresh the hot set on a fixed interval. Spawned
    /// once at startup; runs until the process exits.
    pub async fn run_refresh_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.refresh().await {
                Ok(count) => debug!(count, "blacklist hot set refreshed"),
                Err(e) => error!(error = %e, "blacklist refresh failed, keeping previous set"),
            }
        }
    }

    /// Background loop: apply peer invalidations from the pub/sub channel.
    pub async fn run_invalidation_loop(self: Arc<Self>) {
        let mut rx = match self.kv.subscribe(BLACKLIST_CHANNEL).await {
            Ok(rx) => rx,
            Err(e) => {
                error!(error = %e, "blacklist invalidation subscribe failed");
                return;
            }
        };
        info!(channel = BLACKLIST_CHANNEL, "blacklist invalidation listener started");
        while let Some(message) = rx.recv().await {
            self.apply_invalidation(&message);
        }
        warn!("blacklist invalidation channel closed");
    }

    fn apply_invalidation(&self, message: &str) {
        let event: BlacklistInvalidation = match serde_json::from_str(message) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "undecodable blacklist invalidation dropped");
                return;
            }
        };
        let mut map: HashMap<String, BlacklistEntry> = (*self.hot_snapshot()).clone();
        match event {
            BlacklistInvalidation::Add { entry } => {
                self.miss_cache.invalidate(&entry.ip);
                map.insert(entry.ip.clone(), entry);
            }
            BlacklistInvalidation::Remove { ip } => {
                self.miss_cache.invalidate(&ip);
                map.remove(&ip);
            }
        }
        self.swap_hot(map);
    }

    /// Broadcast an entry addition to all peers (including this process).
    pub async fn announce_add(&self, entry: &BlacklistEntry) -> anyhow::Result<()> {
        let message = serde_json::to_string(&BlacklistInvalidation::Add {
            entry: entry.clone(),
        })?;
        self.kv.publish(BLACKLIST_CHANNEL, &message).await
    }

    /// Broadcast an entry removal to all peers.
    pub async fn announce_remove(&self, ip: &str) -> anyhow::Result<()> {
        let message =
            serde_json::to_string(&BlacklistInvalidation::Remove { ip: ip.to_string() })?;
        self.kv.publish(BLACKLIST_CHANNEL, &message).await
    }

    /// Is this IP currently forbidden?
    pub async fn is_blocked(&self, ip: &str) -> BlacklistVerdict {
        let now = Utc::now();

        if let Some(entry) = self.hot_snapshot().get(ip) {
            if entry.is_effective(now) {
                return BlacklistVerdict::blocked(entry);
            }
            // Expired in the hot set: invisible until the next refresh drops it.
            return BlacklistVerdict::clear();
        }

        if let Some(cached) = self.miss_cache.get(ip) {
            return cached;
        }

        match self.store.entry_for_ip(ip).await {
            Ok(Some(entry)) if entry.is_effective(now) => {
                let verdict = BlacklistVerdict::blocked(&entry);
                self.miss_cache.insert(ip.to_string(), verdict.clone());
                verdict
            }
            Ok(_) => {
                let verdict = BlacklistVerdict::clear();
                self.miss_cache.insert(ip.to_string(), verdict.clone());
                verdict
            }
            Err(e) => {
                // Fail-open for IPs the local tier knows nothing about; the
                // error is not cached so recovery is immediate.
                warn!(ip, error = %e, "blacklist store lookup failed, failing open");
                BlacklistVerdict::clear()
            }
        }
    }
}
