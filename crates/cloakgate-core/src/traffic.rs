use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One append-only row per decided request — mirrors the `traffic_records`
/// table columns exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub id: String,
    pub campaign_id: String,
    pub stream_id: Option<String>,
    /// The visitor's fingerprint hash doubles as the visitor id.
    pub visitor_id: String,
    pub ip: String,
    pub user_agent: String,
    pub referer: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub is_bot: bool,
    pub bot_score: f64,
    /// "money" or "safe".
    pub decision: String,
    pub page_shown: String,
    pub response_time_ms: f64,
    pub created_at: DateTime<Utc>,
}

/// One time-series point per decided request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub time: DateTime<Utc>,
    pub campaign_id: String,
    pub stream_id: Option<String>,
    pub metric_type: String,
    pub value: f64,
    pub tags: MetricTags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricTags {
    pub is_bot: bool,
    pub page_shown: String,
    pub country: Option<String>,
    pub device: Option<String>,
    pub browser: Option<String>,
    pub response_time_ms: f64,
}

impl MetricPoint {
    pub fn page_view(
        campaign_id: &str,
        stream_id: Option<&str>,
        tags: MetricTags,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            time,
            campaign_id: campaign_id.to_string(),
            stream_id: stream_id.map(str::to_string),
            metric_type: "page_view".to_string(),
            value: 1.0,
            tags,
        }
    }
}
