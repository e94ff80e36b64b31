use std::net::IpAddr;
use std::time::Duration;

use cloakgate_core::config::ProviderConfig;

use super::ThreatError;

/// Raw verdict from one reputation source, normalized to a 0–100 score.
#[derive(Debug, Clone)]
pub struct ProviderReport {
    pub provider: String,
    /// Maliciousness score in [0, 100].
    pub score: f64,
    /// How many reports / engines back the score — fed to the reliability
    /// predicate.
    pub reports: u32,
    pub categories: Vec<String>,
}

#[async_trait::async_trait]
pub trait ReputationProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Contribution weight in [0, 1].
    fn weight(&self) -> f64;

    /// Reports below this count the response at half weight.
    fn min_reports(&self) -> u32;

    /// (per-minute, per-day) request budget.
    fn budgets(&self) -> (u32, u32);

    async fn check(&self, ip: IpAddr, timeout: Duration) -> Result<ProviderReport, ThreatError>;
}

/// HTTP reputation source. The response shape is dispatched on the provider
/// name; adding a vendor means adding a parse arm, nothing else.
pub struct HttpReputationProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl HttpReputationProvider {
    pub fn new(config: ProviderConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn parse_abuseipdb(&self, body: &serde_json::Value) -> ProviderReport {
        let data = &body["data"];
        let score = data["abuseConfidenceScore"].as_f64().unwrap_or(0.0);
        let reports = data["totalReports"].as_u64().unwrap_or(0) as u32;
        let mut categories = Vec::new();
        if data["isTor"].as_bool() == Some(true) {
            categories.push("tor".to_string());
        }
        if let Some(usage) = data["usageType"].as_str() {
            if usage.to_lowercase().contains("data center") {
                categories.push("datacenter".to_string());
            }
        }
        ProviderReport {
            provider: self.config.name.clone(),
            score,
            reports,
            categories,
        }
    }

    fn parse_virustotal(&self, body: &serde_json::Value) -> ProviderReport {
        let stats = &body["data"]["attributes"]["last_analysis_stats"];
        let malicious = stats["malicious"].as_f64().unwrap_or(0.0);
        let suspicious = stats["suspicious"].as_f64().unwrap_or(0.0);
        let harmless = stats["harmless"].as_f64().unwrap_or(0.0);
        let undetected = stats["undetected"].as_f64().unwrap_or(0.0);
        let total = malicious + suspicious + harmless + undetected;
        let engines = total as u32;
        let score = if total > 0.0 {
            (malicious + 0.5 * suspicious) / total * 100.0
        } else {
            0.0
        };
        let mut categories = Vec::new();
        if malicious > 0.0 {
            categories.push("flagged_by_engines".to_string());
        }
        ProviderReport {
            provider: self.config.name.clone(),
            score,
            reports: engines,
            categories,
        }
    }
}

#[async_trait::async_trait]
impl ReputationProvider for HttpReputationProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }

    fn min_reports(&self) -> u32 {
        self.config.min_reports
    }

    fn budgets(&self) -> (u32, u32) {
        (self.config.per_minute_budget, self.config.per_day_budget)
    }

    async fn check(&self, ip: IpAddr, timeout: Duration) -> Result<ProviderReport, ThreatError> {
        let request = match self.config.name.as_str() {
            "virustotal" => self
                .client
                .get(format!("{}/{ip}", self.config.endpoint))
                .header("x-apikey", &self.config.api_key),
            // abuseipdb-style query API is the default shape
            _ => self
                .client
                .get(&self.config.endpoint)
                .query(&[("ipAddress", ip.to_string()), ("maxAgeInDays", "90".to_string())])
                .header("Key", &self.config.api_key)
                .header("Accept", "application/json"),
        };

        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ThreatError::Provider(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ThreatError::Provider(format!(
                "{} returned {}",
                self.config.name,
                response.status()
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ThreatError::Provider(e.to_string()))?;

        Ok(match self.config.name.as_str() {
            "virustotal" => self.parse_virustotal(&body),
            _ => self.parse_abuseipdb(&body),
        })
    }
}
