use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use cloakgate_core::campaign::Campaign;
use cloakgate_core::decision::Decision;
use cloakgate_core::store::KeyValueStore;

/// Fingerprint-keyed memoization of final decisions in the shared store.
///
/// The key embeds the campaign's `updated_at` version, so any campaign edit
/// (including a pause) orphans every cached decision instantly — no cached
/// money page survives a pause beyond the write itself propagating.
///
/// Reads and writes are both best-effort: a store error reads as a miss and
/// write failures are logged and swallowed. The cache is an optimization,
/// never a correctness dependency.
pub struct DecisionCache {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl DecisionCache {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    fn key(campaign: &Campaign, fingerprint_hash: &str) -> String {
        format!(
            "decision:{}:{}:{}",
            campaign.id,
            campaign.cache_version(),
            fingerprint_hash
        )
    }

    pub async fn get(&self, campaign: &Campaign, fingerprint_hash: &str) -> Option<Decision> {
        let key = Self::key(campaign, fingerprint_hash);
        match self.kv.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(decision) => Some(decision),
                Err(e) => {
                    debug!(key, error = %e, "cached decision undecodable, treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                debug!(key, error = %e, "decision cache read failed, treating as miss");
                None
            }
        }
    }

    pub async fn store(&self, campaign: &Campaign, fingerprint_hash: &str, decision: &Decision) {
        let key = Self::key(campaign, fingerprint_hash);
        let raw = match serde_json::to_string(decision) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(key, error = %e, "decision serialization failed, not caching");
                return;
            }
        };
        if let Err(e) = self.kv.set_with_ttl(&key, &raw, self.ttl).await {
            debug!(key, error = %e, "decision cache write failed");
        }
    }
}
