use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The six analyzers, in primary-reason tie-break order: when two analyzers
/// report the same top score, the earlier variant here wins, so identical
/// descriptors always yield the same primary reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Headless,
    UserAgent,
    Network,
    Fingerprint,
    Headers,
    Behavior,
}

impl AnalyzerKind {
    pub const ALL: [AnalyzerKind; 6] = [
        AnalyzerKind::Headless,
        AnalyzerKind::UserAgent,
        AnalyzerKind::Network,
        AnalyzerKind::Fingerprint,
        AnalyzerKind::Headers,
        AnalyzerKind::Behavior,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Headless => "headless",
            Self::UserAgent => "user_agent",
            Self::Network => "network",
            Self::Fingerprint => "fingerprint",
            Self::Headers => "headers",
            Self::Behavior => "behavior",
        }
    }
}

/// Output of one analyzer run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzerResult {
    /// Bot likelihood in [0, 1].
    pub score: f64,
    /// How much the engine should trust the score, in [0, 1].
    pub confidence: f64,
    /// Short reason tokens, in trigger order.
    pub flags: Vec<String>,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

impl AnalyzerResult {
    pub fn clean() -> Self {
        Self {
            score: 0.0,
            confidence: 1.0,
            ..Default::default()
        }
    }

    pub fn scored(score: f64, confidence: f64) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    /// Replacement result for an analyzer that panicked or was cut off by
    /// the request deadline.
    pub fn failed(kind: AnalyzerKind) -> Self {
        Self {
            score: 0.0,
            confidence: 0.0,
            flags: vec![format!("analyzer_failed:{}", kind.name())],
            details: HashMap::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.flags.iter().any(|f| f.starts_with("analyzer_failed:"))
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Final classification produced by the detection engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionOutcome {
    pub is_bot: bool,
    pub is_suspicious: bool,
    /// Aggregate weighted score in [0, 1].
    pub score: f64,
    pub confidence: f64,
    /// Bot kind when classified, e.g. "headless", "datacenter", "unknown_bot".
    pub kind: Option<String>,
    pub primary_reason: String,
    /// Per-analyzer raw scores keyed by analyzer name.
    pub analyzer_scores: HashMap<String, f64>,
    /// All flags, prefixed `<analyzer>:<flag>`.
    pub flags: Vec<String>,
}

impl DetectionOutcome {
    pub fn human() -> Self {
        Self {
            is_bot: false,
            is_suspicious: false,
            score: 0.0,
            confidence: 1.0,
            kind: None,
            primary_reason: "human".to_string(),
            analyzer_scores: HashMap::new(),
            flags: Vec::new(),
        }
    }
}
