use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cloaked campaign: one slug, two destinations, one redirect technique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    /// URL slug the public endpoint matches on.
    pub slug: String,
    pub status: CampaignStatus,
    pub money_url: String,
    pub safe_url: String,
    pub redirect_kind: RedirectKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }

    /// Version component stamped into decision-cache keys. Any campaign edit
    /// bumps `updated_at`, which retires every cached decision for it.
    pub fn cache_version(&self) -> i64 {
        self.updated_at.timestamp()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

/// How the responder delivers the destination URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedirectKind {
    #[serde(rename = "301")]
    Http301,
    #[serde(rename = "302")]
    Http302,
    #[serde(rename = "js")]
    Js,
    #[serde(rename = "meta")]
    Meta,
    /// Stored distinctly but rendered identically to `302`.
    #[serde(rename = "direct")]
    Direct,
}

impl RedirectKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "301" => Some(Self::Http301),
            "302" => Some(Self::Http302),
            "js" => Some(Self::Js),
            "meta" => Some(Self::Meta),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http301 => "301",
            Self::Http302 => "302",
            Self::Js => "js",
            Self::Meta => "meta",
            Self::Direct => "direct",
        }
    }
}

/// Weighted sub-routing of a campaign, guarded by targeting rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub campaign_id: String,
    pub name: String,
    /// Weight 0 makes the stream ineligible even when active.
    pub weight: u32,
    pub active: bool,
    pub money_url: Option<String>,
    pub safe_url: Option<String>,
    #[serde(default)]
    pub rules: Vec<TargetingRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Country,
    Device,
    Browser,
    Os,
    Referer,
}

impl RuleType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "country" => Some(Self::Country),
            "device" => Some(Self::Device),
            "browser" => Some(Self::Browser),
            "os" => Some(Self::Os),
            "referer" => Some(Self::Referer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Country => "country",
            Self::Device => "device",
            Self::Browser => "browser",
            Self::Os => "os",
            Self::Referer => "referer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    In,
    NotIn,
    Regex,
}

impl RuleOperator {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "equals" => Some(Self::Equals),
            "not_equals" => Some(Self::NotEquals),
            "contains" => Some(Self::Contains),
            "not_contains" => Some(Self::NotContains),
            "in" => Some(Self::In),
            "not_in" => Some(Self::NotIn),
            "regex" => Some(Self::Regex),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Regex => "regex",
        }
    }
}

/// Rule value: an array for in/not_in, a single string for everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetingRule {
    pub id: String,
    pub stream_id: String,
    pub rule_type: RuleType,
    pub operator: RuleOperator,
    pub value: RuleValue,
    /// true = include-rule (must match), false = exclude-rule (must not).
    pub include: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    Bot,
    Suspicious,
    Manual,
}

impl DetectionKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "bot" => Some(Self::Bot),
            "suspicious" => Some(Self::Suspicious),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::Suspicious => "suspicious",
            Self::Manual => "manual",
        }
    }
}

/// One forbidden IP. `expires_at: None` means permanent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub id: String,
    pub ip: String,
    pub reason: String,
    pub detection_kind: DetectionKind,
    pub confidence: f64,
    pub first_detected_at: DateTime<Utc>,
    pub last_detected_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BlacklistEntry {
    /// An entry blocks iff it is permanent or not yet expired.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => true,
            Some(expires) => now < expires,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(expires_at: Option<DateTime<Utc>>) -> BlacklistEntry {
        let now = Utc::now();
        BlacklistEntry {
            id: "b1".to_string(),
            ip: "203.0.113.9".to_string(),
            reason: "manual block".to_string(),
            detection_kind: DetectionKind::Manual,
            confidence: 1.0,
            first_detected_at: now,
            last_detected_at: now,
            expires_at,
        }
    }

    #[test]
    fn permanent_entry_is_always_effective() {
        assert!(entry(None).is_effective(Utc::now() + Duration::days(3650)));
    }

    #[test]
    fn expired_entry_is_invisible() {
        let e = entry(Some(Utc::now() - Duration::seconds(1)));
        assert!(!e.is_effective(Utc::now()));
    }

    #[test]
    fn future_expiry_still_blocks() {
        let e = entry(Some(Utc::now() + Duration::hours(1)));
        assert!(e.is_effective(Utc::now()));
    }

    #[test]
    fn redirect_kind_round_trips_serde_names() {
        for (kind, name) in [
            (RedirectKind::Http301, "301"),
            (RedirectKind::Http302, "302"),
            (RedirectKind::Js, "js"),
            (RedirectKind::Meta, "meta"),
            (RedirectKind::Direct, "direct"),
        ] {
            assert_eq!(kind.as_str(), name);
            assert_eq!(RedirectKind::parse(name), Some(kind));
        }
    }
}
