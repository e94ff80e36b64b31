pub mod budget;
pub mod provider;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use moka::sync::Cache;
use thiserror::Error;
use tracing::{debug, warn};

use cloakgate_core::config::{Config, ThreatFallback};

use crate::breaker::CircuitBreaker;
use budget::BudgetWindow;
use provider::{HttpReputationProvider, ProviderReport, ReputationProvider};

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);
const CACHE_TTL: Duration = Duration::from_secs(3600);
const CACHE_CAPACITY: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ThreatError {
    #[error("invalid ip: {0}")]
    InvalidIp(String),

    /// Advisory: the caller skips the provider, nothing surfaces upstream.
    #[error("provider budget exhausted")]
    BudgetExhausted,

    #[error("provider failure: {0}")]
    Provider(String),
}

/// Aggregated IP reputation across all consulted providers. Scores follow
/// the providers' 0–100 scale; the network analyzer rescales.
#[derive(Debug, Clone)]
pub struct ThreatAssessment {
    pub score: f64,
    /// How informed the aggregate is, 0–100: the weight share of providers
    /// that actually answered.
    pub confidence: f64,
    pub malicious: bool,
    pub categories: Vec<String>,
    pub summary: String,
    pub consulted: usize,
}

impl ThreatAssessment {
    fn clean(summary: &str) -> Self {
        Self {
            score: 0.0,
            confidence: 0.0,
            malicious: false,
            categories: Vec::new(),
            summary: summary.to_string(),
            consulted: 0,
        }
    }
}

struct ProviderHandle {
    provider: Arc<dyn ReputationProvider>,
    budget: BudgetWindow,
    breaker: CircuitBreaker,
}

pub struct ThreatIntelService {
    handles: Vec<ProviderHandle>,
    fallback: ThreatFallback,
    cache: Cache<IpAddr, ThreatAssessment>,
}

fn is_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_unspecified())
        }
        IpAddr::V6(v6) => {
            !(v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80)
        }
    }
}

impl ThreatIntelService {
    pub fn new(providers: Vec<Arc<dyn ReputationProvider>>, fallback: ThreatFallback) -> Self {
        let handles = providers
            .into_iter()
            .map(|provider| {
                let (per_minute, per_day) = provider.budgets();
                ProviderHandle {
                    breaker: CircuitBreaker::new(format!("threat:{}", provider.name())),
                    budget: BudgetWindow::new(per_minute, per_day),
                    provider,
                }
            })
            .collect();
        Self {
            handles,
            fallback,
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
        }
    }

    /// Build the service from startup configuration. `None` when no provider
    /// is configured — the engine then runs without threat intel.
    pub fn from_config(config: &Config) -> Option<Self> {
        if config.providers.is_empty() {
            return None;
        }
        let client = reqwest::Client::new();
        let providers: Vec<Arc<dyn ReputationProvider>> = config
            .providers
            .iter()
            .map(|p| {
                Arc::new(HttpReputationProvider::new(p.clone(), client.clone()))
                    as Arc<dyn ReputationProvider>
            })
            .collect();
        Some(Self::new(providers, config.threat_fallback))
    }

    /// Look up the aggregate reputation for `ip`, bounded by `deadline`.
    ///
    /// Never fails: unroutable IPs, exhausted budgets, open breakers and
    /// provider errors all degrade to a lower-confidence assessment.
    pub async fn assess(&self, ip: &str, deadline: Instant) -> ThreatAssessment {
        let Ok(parsed) = ip.parse::<IpAddr>() else {
            return ThreatAssessment::clean("invalid ip");
        };
        if !is_routable(parsed) {
            return ThreatAssessment::clean("ip not publicly routable");
        }
        if let Some(cached) = self.cache.get(&parsed) {
            return cached;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return ThreatAssessment::clean("deadline exhausted");
        }
        let timeout = PROVIDER_TIMEOUT.min(remaining);

        let now = Utc::now();
        let mut calls = Vec::new();
        let mut enabled_weight = 0.0;
        for handle in &self.handles {
            enabled_weight += handle.provider.weight();
            if !handle.breaker.allows() {
                debug!(provider = handle.provider.name(), "skipped: breaker open");
                continue;
            }
            if let Err(e) = handle.budget.try_acquire(now) {
                debug!(provider = handle.provider.name(), error = %e, "skipped: over budget");
                continue;
            }
            calls.push(async move {
                let result = handle.provider.check(parsed, timeout).await;
                (handle, result)
            });
        }

        let mut reports: Vec<(f64, ProviderReport)> = Vec::new();
        for (handle, result) in futures::future::join_all(calls).await {
            match result {
                Ok(report) => {
                    handle.breaker.record_success();
                    let reliable = report.reports >= handle.provider.min_reports();
                    let weight = if reliable {
                        handle.provider.weight()
                    } else {
                        handle.provider.weight() * 0.5
                    };
                    reports.push((weight, report));
                }
                Err(e) => {
                    handle.breaker.record_failure();
                    warn!(provider = handle.provider.name(), error = %e, "provider check failed");
                }
            }
        }

        let assessment = self.aggregate(reports, enabled_weight);
        self.cache.insert(parsed, assessment.clone());
        assessment
    }

    fn aggregate(
        &self,
        reports: Vec<(f64, ProviderReport)>,
        enabled_weight: f64,
    ) -> ThreatAssessment {
        if reports.is_empty() {
            return match self.fallback {
                ThreatFallback::Allow => ThreatAssessment::clean("no provider response"),
                ThreatFallback::Block => ThreatAssessment {
                    score: 60.0,
                    confidence: 0.0,
                    malicious: true,
                    categories: vec!["no_provider_response".to_string()],
                    summary: "no provider response, fallback is block".to_string(),
                    consulted: 0,
                },
            };
        }

        let weight_sum: f64 = reports.iter().map(|(w, _)| w).sum();
        let score = reports
            .iter()
            .map(|(w, r)| w * r.score)
            .sum::<f64>()
            / weight_sum;
        let responded_weight: f64 = reports
            .iter()
            .map(|(_, r)| {
                self.handles
                    .iter()
                    .find(|h| h.provider.name() == r.provider)
                    .map(|h| h.provider.weight())
                    .unwrap_or(0.0)
            })
            .sum();
        let confidence = if enabled_weight > 0.0 {
            (responded_weight / enabled_weight * 100.0).min(100.0)
        } else {
            0.0
        };

        let mut categories: Vec<String> = Vec::new();
        for (_, report) in &reports {
            for category in &report.categories {
                if !categories.contains(category) {
                    categories.push(category.clone());
                }
            }
        }

        let consulted = reports.len();
        let names: Vec<&str> = reports.iter().map(|(_, r)| r.provider.as_str()).collect();
        let summary = format!("score {score:.0} from {consulted} provider(s): {}", names.join(", "));

        ThreatAssessment {
            score,
            confidence,
            malicious: score >= 50.0,
            categories,
            summary,
            consulted,
        }
    }
}
