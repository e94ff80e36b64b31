use std::time::Duration;

use ipnet::IpNet;

use crate::error::CoreError;

/// Analyzer weight table. Values are relative; the engine divides by the sum
/// when overrides make it differ from `total_weight`.
#[derive(Debug, Clone)]
pub struct AnalyzerWeights {
    pub user_agent: f64,
    pub headers: f64,
    pub network: f64,
    pub fingerprint: f64,
    pub headless: f64,
    pub behavior: f64,
}

impl Default for AnalyzerWeights {
    fn default() -> Self {
        Self {
            user_agent: 0.20,
            headers: 0.15,
            network: 0.20,
            fingerprint: 0.20,
            headless: 0.15,
            behavior: 0.10,
        }
    }
}

impl AnalyzerWeights {
    pub fn sum(&self) -> f64 {
        self.user_agent
            + self.headers
            + self.network
            + self.fingerprint
            + self.headless
            + self.behavior
    }
}

/// Minimum major versions before the user-agent analyzer flags a browser as
/// outdated.
#[derive(Debug, Clone)]
pub struct OutdatedBrowserThresholds {
    pub chrome: u32,
    pub firefox: u32,
    pub safari: u32,
    pub edge: u32,
}

impl Default for OutdatedBrowserThresholds {
    fn default() -> Self {
        Self {
            chrome: 90,
            firefox: 88,
            safari: 14,
            edge: 90,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectionTuning {
    pub enabled: bool,
    /// Aggregate score at or above which a visitor is a bot.
    pub bot_threshold: f64,
    /// Aggregate score at or above which a visitor is suspicious.
    pub suspicious_threshold: f64,
    pub weights: AnalyzerWeights,
    /// The weights are expected to sum to this; any drift is normalized away.
    pub total_weight: f64,
    /// Individual analyzer score that qualifies it as the primary reason.
    pub reason_floor: f64,
    pub outdated: OutdatedBrowserThresholds,
    /// Hard per-request budget for the whole pipeline.
    pub request_budget_ms: u64,
}

impl Default for DetectionTuning {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_threshold: 0.7,
            suspicious_threshold: 0.5,
            weights: AnalyzerWeights::default(),
            total_weight: 1.0,
            reason_floor: 0.8,
            outdated: OutdatedBrowserThresholds::default(),
            request_budget_ms: 50,
        }
    }
}

/// What the detection engine assumes when no threat provider responded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatFallback {
    /// Score 0 — visitors pass on provider silence.
    Allow,
    /// Treat as suspicious.
    Block,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub api_key: String,
    pub endpoint: String,
    /// Contribution weight in [0, 1].
    pub weight: f64,
    pub per_minute_budget: u32,
    pub per_day_budget: u32,
    /// Reliability predicate: a response backed by fewer reports/engines than
    /// this counts at half weight.
    pub min_reports: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub geoip_path: String,
    /// Absent → the in-memory key-value store backs caches and pub/sub
    /// (single-process deployments and tests).
    pub redis_url: Option<String>,
    /// Peers inside these CIDRs may speak for the client via
    /// X-Forwarded-For / X-Real-IP.
    pub trusted_proxies: Vec<IpNet>,
    pub detection: DetectionTuning,
    pub threat_fallback: ThreatFallback,
    pub providers: Vec<ProviderConfig>,
    /// Where blacklisted / threat-flagged visitors are sent.
    pub block_url: String,
    /// Where unknown slugs are sent.
    pub not_found_url: String,
    pub decision_cache_ttl_seconds: u64,
    pub resolver_cache_ttl_seconds: u64,
    pub blacklist_refresh_seconds: u64,
    pub sink_capacity: usize,
    pub sink_workers: usize,
    pub shutdown_grace_seconds: u64,
    /// Newline-delimited TOR exit node list, loaded once at startup.
    pub tor_exit_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            data_dir: "./data".to_string(),
            geoip_path: "./GeoLite2-City.mmdb".to_string(),
            redis_url: None,
            trusted_proxies: Vec::new(),
            detection: DetectionTuning::default(),
            threat_fallback: ThreatFallback::Allow,
            providers: Vec::new(),
            block_url: "/404".to_string(),
            not_found_url: "/404".to_string(),
            decision_cache_ttl_seconds: 300,
            resolver_cache_ttl_seconds: 60,
            blacklist_refresh_seconds: 30,
            sink_capacity: 10_000,
            sink_workers: 2,
            shutdown_grace_seconds: 5,
            tor_exit_path: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("invalid {name}: {raw:?}")),
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

impl Config {
    /// Read the whole configuration from the environment, once, at startup.
    ///
    /// Nothing here is re-read later; a worker that needs a tunable gets it
    /// through the shared `Arc<Config>`. Any invalid value aborts startup.
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Config::default();
        let tuning_defaults = DetectionTuning::default();
        let weight_defaults = AnalyzerWeights::default();
        let outdated_defaults = OutdatedBrowserThresholds::default();

        let detection = DetectionTuning {
            enabled: env_flag("CLOAKGATE_DETECTION_ENABLED", true),
            bot_threshold: env_parse("CLOAKGATE_BOT_THRESHOLD", tuning_defaults.bot_threshold)?,
            suspicious_threshold: env_parse(
                "CLOAKGATE_SUSPICIOUS_THRESHOLD",
                tuning_defaults.suspicious_threshold,
            )?,
            weights: AnalyzerWeights {
                user_agent: env_parse("CLOAKGATE_WEIGHT_USER_AGENT", weight_defaults.user_agent)?,
                headers: env_parse("CLOAKGATE_WEIGHT_HEADERS", weight_defaults.headers)?,
                network: env_parse("CLOAKGATE_WEIGHT_NETWORK", weight_defaults.network)?,
                fingerprint: env_parse(
                    "CLOAKGATE_WEIGHT_FINGERPRINT",
                    weight_defaults.fingerprint,
                )?,
                headless: env_parse("CLOAKGATE_WEIGHT_HEADLESS", weight_defaults.headless)?,
                behavior: env_parse("CLOAKGATE_WEIGHT_BEHAVIOR", weight_defaults.behavior)?,
            },
            total_weight: env_parse("CLOAKGATE_TOTAL_WEIGHT", tuning_defaults.total_weight)?,
            reason_floor: tuning_defaults.reason_floor,
            outdated: OutdatedBrowserThresholds {
                chrome: env_parse("CLOAKGATE_MIN_CHROME", outdated_defaults.chrome)?,
                firefox: env_parse("CLOAKGATE_MIN_FIREFOX", outdated_defaults.firefox)?,
                safari: env_parse("CLOAKGATE_MIN_SAFARI", outdated_defaults.safari)?,
                edge: env_parse("CLOAKGATE_MIN_EDGE", outdated_defaults.edge)?,
            },
            request_budget_ms: env_parse(
                "CLOAKGATE_REQUEST_BUDGET_MS",
                tuning_defaults.request_budget_ms,
            )?,
        };

        let threat_fallback = match std::env::var("CLOAKGATE_THREAT_FALLBACK").as_deref() {
            Err(_) | Ok("allow") => ThreatFallback::Allow,
            Ok("block") => ThreatFallback::Block,
            Ok(other) => {
                return Err(CoreError::Config(format!(
                    "CLOAKGATE_THREAT_FALLBACK must be allow or block, got {other:?}"
                )))
            }
        };

        let mut providers = Vec::new();
        if let Ok(key) = std::env::var("CLOAKGATE_ABUSEIPDB_KEY") {
            providers.push(ProviderConfig {
                name: "abuseipdb".to_string(),
                api_key: key,
                endpoint: "https://api.abuseipdb.com/api/v2/check".to_string(),
                weight: env_parse("CLOAKGATE_ABUSEIPDB_WEIGHT", 0.6)?,
                per_minute_budget: env_parse("CLOAKGATE_ABUSEIPDB_PER_MINUTE", 30)?,
                per_day_budget: env_parse("CLOAKGATE_ABUSEIPDB_PER_DAY", 1000)?,
                min_reports: env_parse("CLOAKGATE_ABUSEIPDB_MIN_REPORTS", 3)?,
            });
        }
        if let Ok(key) = std::env::var("CLOAKGATE_VIRUSTOTAL_KEY") {
            providers.push(ProviderConfig {
                name: "virustotal".to_string(),
                api_key: key,
                endpoint: "https://www.virustotal.com/api/v3/ip_addresses".to_string(),
                weight: env_parse("CLOAKGATE_VIRUSTOTAL_WEIGHT", 0.4)?,
                per_minute_budget: env_parse("CLOAKGATE_VIRUSTOTAL_PER_MINUTE", 4)?,
                per_day_budget: env_parse("CLOAKGATE_VIRUSTOTAL_PER_DAY", 500)?,
                min_reports: env_parse("CLOAKGATE_VIRUSTOTAL_MIN_ENGINES", 2)?,
            });
        }

        let trusted_proxies = std::env::var("CLOAKGATE_TRUSTED_PROXIES")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|entry| {
                        entry
                            .parse::<IpNet>()
                            .map_err(|e| format!("invalid trusted proxy CIDR {entry:?}: {e}"))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let config = Self {
            port: env_parse("CLOAKGATE_PORT", defaults.port)?,
            data_dir: std::env::var("CLOAKGATE_DATA_DIR").unwrap_or(defaults.data_dir),
            geoip_path: std::env::var("CLOAKGATE_GEOIP_PATH").unwrap_or(defaults.geoip_path),
            redis_url: std::env::var("CLOAKGATE_REDIS_URL").ok(),
            trusted_proxies,
            detection,
            threat_fallback,
            providers,
            block_url: std::env::var("CLOAKGATE_BLOCK_URL").unwrap_or(defaults.block_url),
            not_found_url: std::env::var("CLOAKGATE_NOT_FOUND_URL")
                .unwrap_or(defaults.not_found_url),
            decision_cache_ttl_seconds: env_parse(
                "CLOAKGATE_DECISION_CACHE_TTL",
                defaults.decision_cache_ttl_seconds,
            )?,
            resolver_cache_ttl_seconds: env_parse(
                "CLOAKGATE_RESOLVER_CACHE_TTL",
                defaults.resolver_cache_ttl_seconds,
            )?,
            blacklist_refresh_seconds: env_parse(
                "CLOAKGATE_BLACKLIST_REFRESH_SECONDS",
                defaults.blacklist_refresh_seconds,
            )?,
            sink_capacity: env_parse("CLOAKGATE_SINK_CAPACITY", defaults.sink_capacity)?,
            sink_workers: env_parse("CLOAKGATE_SINK_WORKERS", defaults.sink_workers)?,
            shutdown_grace_seconds: env_parse(
                "CLOAKGATE_SHUTDOWN_GRACE_SECONDS",
                defaults.shutdown_grace_seconds,
            )?,
            tor_exit_path: std::env::var("CLOAKGATE_TOR_EXIT_PATH").ok(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        let d = &self.detection;
        for (name, value) in [
            ("bot threshold", d.bot_threshold),
            ("suspicious threshold", d.suspicious_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be in [0, 1], got {value}"));
            }
        }
        if d.suspicious_threshold > d.bot_threshold {
            return Err(format!(
                "suspicious threshold ({}) must not exceed bot threshold ({})",
                d.suspicious_threshold, d.bot_threshold
            ));
        }
        let w = &d.weights;
        for (name, value) in [
            ("user_agent", w.user_agent),
            ("headers", w.headers),
            ("network", w.network),
            ("fingerprint", w.fingerprint),
            ("headless", w.headless),
            ("behavior", w.behavior),
        ] {
            if value < 0.0 {
                return Err(format!("analyzer weight {name} must be non-negative"));
            }
        }
        if w.sum() <= 0.0 {
            return Err("analyzer weights must not all be zero".to_string());
        }
        for provider in &self.providers {
            if !(0.0..=1.0).contains(&provider.weight) {
                return Err(format!(
                    "provider {} weight must be in [0, 1]",
                    provider.name
                ));
            }
        }
        if self.sink_capacity == 0 || self.sink_workers == 0 {
            return Err("sink capacity and worker count must be positive".to_string());
        }
        Ok(())
    }

    pub fn request_budget(&self) -> Duration {
        Duration::from_millis(self.detection.request_budget_ms)
    }

    pub fn decision_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.decision_cache_ttl_seconds)
    }

    pub fn resolver_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.resolver_cache_ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_total() {
        let tuning = DetectionTuning::default();
        assert!((tuning.weights.sum() - tuning.total_weight).abs() < 1e-9);
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let mut config = Config::default();
        config.detection.bot_threshold = 0.4;
        config.detection.suspicious_threshold = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_all_zero_weights() {
        let mut config = Config::default();
        config.detection.weights = AnalyzerWeights {
            user_agent: 0.0,
            headers: 0.0,
            network: 0.0,
            fingerprint: 0.0,
            headless: 0.0,
            behavior: 0.0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }
}
