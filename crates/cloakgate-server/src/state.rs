use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use cloakgate_core::config::Config;
use cloakgate_core::decision::Decision;
use cloakgate_core::store::{BlacklistStore, CampaignStore, KeyValueStore, TrafficStore};
use cloakgate_core::traffic::{MetricPoint, MetricTags, TrafficRecord};
use cloakgate_core::visitor::VisitorDescriptor;
use cloakgate_detection::blacklist::BlacklistChecker;
use cloakgate_detection::engine::DetectionEngine;
use cloakgate_detection::threat::ThreatIntelService;
use cloakgate_duckdb::DuckDbBackend;

use crate::decision_cache::DecisionCache;
use crate::extract::GeoDb;
use crate::resolver::CampaignResolver;
use crate::sink::{SinkPayload, TrafficSink};

/// Composition root: every shared service, constructed once at startup and
/// passed by `Arc` into handlers and background loops. No lazy singletons.
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<DuckDbBackend>,
    pub kv: Arc<dyn KeyValueStore>,
    pub geo: GeoDb,
    pub engine: DetectionEngine,
    pub threat: Option<Arc<ThreatIntelService>>,
    pub blacklist: Arc<BlacklistChecker>,
    pub resolver: Arc<CampaignResolver>,
    pub decision_cache: DecisionCache,
    pub sink: TrafficSink,
}

impl AppState {
    pub fn new(config: Config, db: DuckDbBackend, kv: Arc<dyn KeyValueStore>) -> Self {
        let config = Arc::new(config);
        let db = Arc::new(db);
        let geo = GeoDb::load(&config.geoip_path);
        let threat = ThreatIntelService::from_config(&config).map(Arc::new);
        let engine = DetectionEngine::new(&config, threat.clone());
        let blacklist = Arc::new(BlacklistChecker::new(
            Arc::clone(&db) as Arc<dyn BlacklistStore>,
            Arc::clone(&kv),
        ));
        let resolver = Arc::new(CampaignResolver::new(
            Arc::clone(&db) as Arc<dyn CampaignStore>,
            Arc::clone(&kv),
            config.resolver_cache_ttl(),
        ));
        let decision_cache = DecisionCache::new(Arc::clone(&kv), config.decision_cache_ttl());
        let sink = TrafficSink::spawn(
            Arc::clone(&db) as Arc<dyn TrafficStore>,
            config.sink_capacity,
            config.sink_workers,
        );
        Self {
            config,
            db,
            kv,
            geo,
            engine,
            threat,
            blacklist,
            resolver,
            decision_cache,
            sink,
        }
    }

    /// Start the long-lived maintenance loops. Called once from `main`;
    /// integration tests drive the caches directly instead.
    pub fn spawn_background(self: &Arc<Self>) {
        tokio::spawn(
            Arc::clone(&self.blacklist)
                .run_refresh_loop(Duration::from_secs(self.config.blacklist_refresh_seconds)),
        );
        tokio::spawn(Arc::clone(&self.blacklist).run_invalidation_loop());
        tokio::spawn(Arc::clone(&self.resolver).run_invalidation_loop());
    }

    /// Fire-and-forget analytics for one decided request.
    pub fn record_traffic(&self, descriptor: &VisitorDescriptor, decision: &Decision) {
        let now = Utc::now();
        let response_time_ms = decision.elapsed_micros as f64 / 1000.0;
        let record = TrafficRecord {
            id: uuid::Uuid::new_v4().to_string(),
            campaign_id: decision.campaign_id.clone(),
            stream_id: decision.stream_id.clone(),
            visitor_id: descriptor.fingerprint_hash.clone(),
            ip: descriptor.ip.clone(),
            user_agent: descriptor.user_agent.clone(),
            referer: descriptor.referrer.clone(),
            country: descriptor.geo.as_ref().and_then(|g| g.country.clone()),
            city: descriptor.geo.as_ref().and_then(|g| g.city.clone()),
            device_type: descriptor.ua.as_ref().map(|u| u.device_type.clone()),
            browser: descriptor.ua.as_ref().map(|u| u.browser.clone()),
            os: descriptor.ua.as_ref().map(|u| u.os.clone()),
            is_bot: decision.bot_score >= self.config.detection.bot_threshold,
            bot_score: decision.bot_score,
            decision: decision.page.as_str().to_string(),
            page_shown: decision.page.as_str().to_string(),
            response_time_ms,
            created_at: now,
        };
        let point = MetricPoint::page_view(
            &decision.campaign_id,
            decision.stream_id.as_deref(),
            MetricTags {
                is_bot: record.is_bot,
                page_shown: decision.page.as_str().to_string(),
                country: record.country.clone(),
                device: record.device_type.clone(),
                browser: record.browser.clone(),
                response_time_ms,
            },
            now,
        );
        self.sink.enqueue(SinkPayload { record, point });
    }
}
