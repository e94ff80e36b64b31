use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;
use sha2::{Digest, Sha256};
use tracing::warn;

use cloakgate_core::config::{Config, DetectionTuning};
use cloakgate_core::detection::{AnalyzerKind, AnalyzerResult, DetectionOutcome};
use cloakgate_core::visitor::VisitorDescriptor;

use crate::analyzers::{self, NetworkContext};
use crate::threat::{ThreatAssessment, ThreatIntelService};

const OUTCOME_CACHE_CAPACITY: u64 = 10_000;
const OUTCOME_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Analyzers whose individual verdict is strong enough to carry the
/// classification regardless of what the weighted mean says.
const DOMINANT_SCORE: f64 = 0.85;
const DOMINANT_CONFIDENCE: f64 = 0.85;

/// How many failed analyzers turn the outcome into a degraded pass-through.
const DEGRADED_FAILURE_COUNT: usize = 3;

impl NetworkContext {
    /// Load the optional TOR exit-node list (newline-delimited IPs), once,
    /// at startup. A missing or unreadable file logs and yields an empty set.
    pub fn from_tor_file(path: Option<&str>) -> Self {
        let mut ctx = NetworkContext::default();
        let Some(path) = path else {
            return ctx;
        };
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                ctx.tor_exits = contents
                    .lines()
                    .filter_map(|line| line.trim().parse().ok())
                    .collect();
                tracing::info!(path, count = ctx.tor_exits.len(), "loaded TOR exit list");
            }
            Err(e) => {
                warn!(path, error = %e, "TOR exit list unreadable, continuing without");
            }
        }
        ctx
    }
}

/// The detection engine: fans the analyzer bank out, joins under the request
/// deadline, aggregates, classifies, and memoizes complete outcomes.
pub struct DetectionEngine {
    tuning: Arc<DetectionTuning>,
    network_ctx: Arc<NetworkContext>,
    threat: Option<Arc<ThreatIntelService>>,
    cache: Cache<String, DetectionOutcome>,
}

impl DetectionEngine {
    pub fn new(config: &Config, threat: Option<Arc<ThreatIntelService>>) -> Self {
        Self {
            tuning: Arc::new(config.detection.clone()),
            network_ctx: Arc::new(NetworkContext::from_tor_file(config.tor_exit_path.as_deref())),
            threat,
            cache: Cache::builder()
                .max_capacity(OUTCOME_CACHE_CAPACITY)
                .time_to_live(OUTCOME_CACHE_TTL)
                .build(),
        }
    }

    fn cache_key(descriptor: &VisitorDescriptor) -> String {
        let ua_digest = hex::encode(&Sha256::digest(descriptor.user_agent.as_bytes())[..8]);
        let fp = if descriptor.fingerprint.is_some() {
            descriptor.fingerprint_hash.as_str()
        } else {
            "-"
        };
        format!("{}|{}|{}", descriptor.ip, ua_digest, fp)
    }

    /// Classify one visitor. Always returns within the deadline plus one
    /// scheduler tick; analyzers that miss it are treated as failed.
    pub async fn analyze(
        &self,
        descriptor: Arc<VisitorDescriptor>,
        deadline: Instant,
    ) -> DetectionOutcome {
        if !self.tuning.enabled {
            return DetectionOutcome::human();
        }

        let key = Self::cache_key(&descriptor);
        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        // One threat-intel fetch per request; the network analyzer consumes
        // the result instead of doing I/O itself.
        let threat = match &self.threat {
            Some(service) => Some(service.assess(&descriptor.ip, deadline).await),
            None => None,
        };

        let (results, timed_out) = self.fan_out(&descriptor, threat.as_ref(), deadline).await;

        let failed = results.values().filter(|r| r.is_failed()).count();
        let outcome = if failed >= DEGRADED_FAILURE_COUNT {
            warn!(ip = %descriptor.ip, failed, "detection degraded: too many analyzer failures");
            self.degraded_outcome(&results, timed_out)
        } else {
            self.aggregate(&results, timed_out)
        };

        // Only complete runs are worth memoizing; partial results would pin a
        // transient degradation for the cache lifetime.
        if !timed_out && failed == 0 {
            self.cache.insert(key, outcome.clone());
        }
        outcome
    }

    async fn fan_out(
        &self,
        descriptor: &Arc<VisitorDescriptor>,
        threat: Option<&ThreatAssessment>,
        deadline: Instant,
    ) -> (HashMap<AnalyzerKind, AnalyzerResult>, bool) {
        // Budget already gone: report every analyzer as failed instead of
        // spawning work whose results nobody may wait for.
        if Instant::now() >= deadline {
            let results = AnalyzerKind::ALL
                .into_iter()
                .map(|kind| (kind, AnalyzerResult::failed(kind)))
                .collect();
            return (results, true);
        }

        let mut handles = Vec::with_capacity(AnalyzerKind::ALL.len());
        for kind in AnalyzerKind::ALL {
            let descriptor = Arc::clone(descriptor);
            let tuning = Arc::clone(&self.tuning);
            let ctx = Arc::clone(&self.network_ctx);
            let threat = threat.cloned();
            handles.push((
                kind,
                tokio::spawn(async move {
                    analyzers::run(kind, &descriptor, &tuning, &ctx, threat.as_ref())
                }),
            ));
        }

        let tokio_deadline = tokio::time::Instant::from_std(deadline);
        let mut results = HashMap::with_capacity(handles.len());
        let mut timed_out = false;
        for (kind, handle) in handles {
            match tokio::time::timeout_at(tokio_deadline, handle).await {
                Ok(Ok(result)) => {
                    results.insert(kind, result);
                }
                Ok(Err(join_error)) => {
                    warn!(analyzer = kind.name(), error = %join_error, "analyzer task failed");
                    results.insert(kind, AnalyzerResult::failed(kind));
                }
                Err(_) => {
                    timed_out = true;
                    results.insert(kind, AnalyzerResult::failed(kind));
                }
            }
        }
        (results, timed_out)
    }

    fn weight_of(&self, kind: AnalyzerKind) -> f64 {
        let w = &self.tuning.weights;
        match kind {
            AnalyzerKind::UserAgent => w.user_agent,
            AnalyzerKind::Headers => w.headers,
            AnalyzerKind::Network => w.network,
            AnalyzerKind::Fingerprint => w.fingerprint,
            AnalyzerKind::Headless => w.headless,
            AnalyzerKind::Behavior => w.behavior,
        }
    }

    fn collect_flags(results: &HashMap<AnalyzerKind, AnalyzerResult>) -> Vec<String> {
        let mut flags = Vec::new();
        for kind in AnalyzerKind::ALL {
            if let Some(result) = results.get(&kind) {
                for flag in &result.flags {
                    // Failure markers already carry the analyzer name.
                    if flag.starts_with("analyzer_failed:") {
                        flags.push(flag.clone());
                    } else {
                        flags.push(format!("{}:{flag}", kind.name()));
                    }
                }
            }
        }
        flags
    }

    fn scores_by_name(results: &HashMap<AnalyzerKind, AnalyzerResult>) -> HashMap<String, f64> {
        results
            .iter()
            .map(|(kind, result)| (kind.name().to_string(), result.score))
            .collect()
    }

    fn degraded_outcome(
        &self,
        results: &HashMap<AnalyzerKind, AnalyzerResult>,
        timed_out: bool,
    ) -> DetectionOutcome {
        let mut flags = Self::collect_flags(results);
        if timed_out {
            flags.push("detection_timed_out".to_string());
        }
        DetectionOutcome {
            is_bot: false,
            is_suspicious: false,
            score: 0.0,
            confidence: 0.0,
            kind: None,
            primary_reason: "detection_degraded".to_string(),
            analyzer_scores: Self::scores_by_name(results),
            flags,
        }
    }

    fn aggregate(
        &self,
        results: &HashMap<AnalyzerKind, AnalyzerResult>,
        timed_out: bool,
    ) -> DetectionOutcome {
        let weight_sum: f64 = AnalyzerKind::ALL
            .iter()
            .map(|kind| self.weight_of(*kind))
            .sum();
        let mut score = 0.0;
        let mut confidence = 0.0;
        for kind in AnalyzerKind::ALL {
            let weight = self.weight_of(kind) / weight_sum * self.tuning.total_weight;
            if let Some(result) = results.get(&kind) {
                score += weight * result.score;
                confidence += weight * result.confidence;
            }
        }

        // A single high-confidence strong signal decides on its own — a
        // perfect-looking descriptor elsewhere must not dilute a webdriver
        // header or a private source address below threshold.
        for result in results.values() {
            if !result.is_failed()
                && result.score >= DOMINANT_SCORE
                && result.confidence >= DOMINANT_CONFIDENCE
            {
                score = score.max(result.score);
                confidence = confidence.max(result.confidence);
            }
        }
        score = score.clamp(0.0, 1.0);

        let is_bot = score >= self.tuning.bot_threshold;
        let is_suspicious = score >= self.tuning.suspicious_threshold;

        let (primary_reason, kind) = self.primary_reason(results, is_bot, is_suspicious);

        let mut flags = Self::collect_flags(results);
        if timed_out {
            flags.push("detection_timed_out".to_string());
        }

        DetectionOutcome {
            is_bot,
            is_suspicious,
            score,
            confidence: confidence.clamp(0.0, 1.0),
            kind,
            primary_reason,
            analyzer_scores: Self::scores_by_name(results),
            flags,
        }
    }

    fn primary_reason(
        &self,
        results: &HashMap<AnalyzerKind, AnalyzerResult>,
        is_bot: bool,
        is_suspicious: bool,
    ) -> (String, Option<String>) {
        if !is_bot && !is_suspicious {
            return ("human".to_string(), None);
        }

        // Headless wins outright when it cleared the floor.
        if let Some(headless) = results.get(&AnalyzerKind::Headless) {
            if headless.score >= self.tuning.reason_floor {
                let framework = headless
                    .details
                    .get("framework")
                    .and_then(|v| v.as_str())
                    .unwrap_or("generic_headless");
                let reason = if framework == "generic_headless" {
                    "headless".to_string()
                } else {
                    format!("headless_{framework}")
                };
                return (reason, Some("headless".to_string()));
            }
        }

        // Otherwise the strongest analyzer above the floor; AnalyzerKind::ALL
        // order breaks ties, so identical descriptors agree on the reason.
        let mut best: Option<(AnalyzerKind, f64)> = None;
        for kind in AnalyzerKind::ALL {
            if let Some(result) = results.get(&kind) {
                if result.score >= self.tuning.reason_floor
                    && best.map(|(_, s)| result.score > s).unwrap_or(true)
                {
                    best = Some((kind, result.score));
                }
            }
        }
        if let Some((kind, _)) = best {
            let bot_kind = match kind {
                AnalyzerKind::Headless => "headless".to_string(),
                AnalyzerKind::UserAgent => "known_bot".to_string(),
                AnalyzerKind::Network => {
                    let network_flags = results
                        .get(&AnalyzerKind::Network)
                        .map(|r| r.flags.as_slice())
                        .unwrap_or_default();
                    if network_flags.iter().any(|f| f == "tor_exit_node") {
                        "tor".to_string()
                    } else if network_flags.iter().any(|f| f == "datacenter_ip") {
                        "datacenter".to_string()
                    } else {
                        "bad_network".to_string()
                    }
                }
                AnalyzerKind::Fingerprint => "suspicious_fingerprint".to_string(),
                AnalyzerKind::Headers => "suspicious_headers".to_string(),
                AnalyzerKind::Behavior => "automation_behavior".to_string(),
            };
            return (kind.name().to_string(), Some(bot_kind));
        }

        if is_bot {
            ("unknown_bot".to_string(), Some("unknown_bot".to_string()))
        } else {
            ("suspicious".to_string(), Some("suspicious".to_string()))
        }
    }
}
