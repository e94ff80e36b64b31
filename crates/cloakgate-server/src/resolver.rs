use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use cloakgate_core::campaign::{Campaign, Stream};
use cloakgate_core::store::{CampaignStore, KeyValueStore};

/// Pub/sub channel the admin surface posts campaign writes to.
pub const CAMPAIGN_CHANNEL: &str = "cloakgate:campaigns";

const CACHE_CAPACITY: u64 = 10_000;

/// Invalidation event for one campaign.
#[derive(Debug, Serialize, Deserialize)]
pub struct CampaignInvalidation {
    pub campaign_id: String,
    pub slug: String,
}

/// Read-through caches over the campaign store.
///
/// Slug → campaign and campaign → streams (rules attached) both expire after
/// the configured TTL and are dropped early by pub/sub invalidation, so a
/// pause propagates in one round-trip rather than a full TTL.
pub struct CampaignResolver {
    store: Arc<dyn CampaignStore>,
    kv: Arc<dyn KeyValueStore>,
    campaigns: Cache<String, Campaign>,
    streams: Cache<String, Arc<Vec<Stream>>>,
}

impl CampaignResolver {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        kv: Arc<dyn KeyValueStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            kv,
            campaigns: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(ttl)
                .build(),
            streams: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Slug → campaign, or `None` for unknown slugs. Store failures retry
    /// once, then resolve as not-found per the decision-path failure policy.
    pub async fn resolve_by_slug(&self, slug: &str) -> Option<Campaign> {
        if let Some(campaign) = self.campaigns.get(slug).await {
            return Some(campaign);
        }
        let campaign = match self.store.campaign_by_slug(slug).await {
            Ok(result) => result,
            Err(first) => {
                warn!(slug, error = %first, "campaign lookup failed, retrying once");
                match self.store.campaign_by_slug(slug).await {
                    Ok(result) => result,
                    Err(second) => {
                        error!(slug, error = %second, "campaign lookup retry failed");
                        None
                    }
                }
            }
        }?;
        self.campaigns
            .insert(slug.to_string(), campaign.clone())
            .await;
        Some(campaign)
    }

    /// Active streams (with targeting rules) for a campaign. A store failure
    /// yields the empty list — the composer then uses the campaign base URLs.
    pub async fn streams_for(&self, campaign_id: &str) -> Arc<Vec<Stream>> {
        if let Some(streams) = self.streams.get(campaign_id).await {
            return streams;
        }
        let streams = match self.store.streams_for_campaign(campaign_id).await {
            Ok(streams) => Arc::new(streams),
            Err(e) => {
                warn!(campaign_id, error = %e, "stream load failed, using campaign base URLs");
                return Arc::new(Vec::new());
            }
        };
        self.streams
            .insert(campaign_id.to_string(), Arc::clone(&streams))
            .await;
        streams
    }

    /// Background loop: drop cache lines when peers announce campaign writes.
    pub async fn run_invalidation_loop(self: Arc<Self>) {
        let mut rx = match self.kv.subscribe(CAMPAIGN_CHANNEL).await {
            Ok(rx) => rx,
            Err(e) => {
                error!(error = %e, "campaign invalidation subscribe failed");
                return;
            }
        };
        info!(channel = CAMPAIGN_CHANNEL, "campaign invalidation listener started");
        while let Some(message) = rx.recv().await {
            match serde_json::from_str::<CampaignInvalidation>(&message) {
                Ok(event) => {
                    self.campaigns.invalidate(&event.slug).await;
                    self.streams.invalidate(&event.campaign_id).await;
                }
                Err(e) => warn!(error = %e, "undecodable campaign invalidation dropped"),
            }
        }
        warn!("campaign invalidation channel closed");
    }
}
