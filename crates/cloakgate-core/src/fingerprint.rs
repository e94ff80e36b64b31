use serde::{Deserialize, Serialize};

/// Browser fingerprint as exported by the collector script.
///
/// Every field is optional: the collector degrades per-API (canvas blocked,
/// audio context denied, ...) and older collector versions omit whole
/// sub-objects. Unknown fields are ignored so collector upgrades never break
/// ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub canvas: Option<CanvasFingerprint>,
    pub webgl: Option<WebglFingerprint>,
    pub audio: Option<AudioFingerprint>,
    pub screen: Option<ScreenFingerprint>,
    pub device: Option<DeviceFingerprint>,
    pub environment: Option<EnvironmentFingerprint>,
    pub headless_detection: Option<HeadlessDetection>,
    pub behavior: Option<BehaviorMetrics>,
    pub ja3: Option<String>,
    pub ja3s: Option<String>,
}

impl Fingerprint {
    /// True when no sub-object carries any data at all.
    pub fn is_empty(&self) -> bool {
        self.canvas.is_none()
            && self.webgl.is_none()
            && self.audio.is_none()
            && self.screen.is_none()
            && self.device.is_none()
            && self.environment.is_none()
            && self.headless_detection.is_none()
            && self.behavior.is_none()
            && self.ja3.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasFingerprint {
    pub hash: Option<String>,
    pub geometry: Option<String>,
    pub text: Option<String>,
    pub is_blocked: Option<bool>,
    pub is_empty: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebglFingerprint {
    pub vendor: Option<String>,
    pub renderer: Option<String>,
    pub version: Option<String>,
    pub hash: Option<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFingerprint {
    pub context_hash: Option<String>,
    pub oscillator_hash: Option<String>,
    pub dynamics_hash: Option<String>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u32>,
    /// AudioContext state, e.g. "running" or "suspended".
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenFingerprint {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub avail_width: Option<u32>,
    pub avail_height: Option<u32>,
    pub color_depth: Option<u32>,
    pub pixel_ratio: Option<f64>,
    pub orientation: Option<String>,
    pub viewport_width: Option<u32>,
    pub viewport_height: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFingerprint {
    pub hardware_concurrency: Option<u32>,
    pub max_touch_points: Option<u32>,
    pub device_memory: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentFingerprint {
    pub timezone: Option<String>,
    pub timezone_offset: Option<i32>,
    #[serde(default)]
    pub languages: Vec<String>,
    pub platform: Option<String>,
    #[serde(default)]
    pub plugins: Vec<String>,
    pub webdriver: Option<bool>,
    pub cdp_active: Option<bool>,
}

/// Verdict of the collector's own in-browser headless heuristics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadlessDetection {
    pub is_headless: Option<bool>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub detections: Vec<String>,
}

/// Interaction metrics collected over the first seconds on page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorMetrics {
    /// Ratio of mouse path length to straight-line distance; 1.0 is a
    /// perfectly linear sweep.
    pub mouse_linearity: Option<f64>,
    /// Standard deviation of inter-key intervals in milliseconds.
    pub typing_variance_ms: Option<f64>,
    /// Characters per minute.
    pub typing_rate_cpm: Option<f64>,
    /// Milliseconds from load to first interaction.
    pub first_interaction_ms: Option<f64>,
    pub scroll_depth: Option<f64>,
    pub page_height: Option<u32>,
    pub viewport_height: Option<u32>,
    /// Milliseconds spent filling a form before submit, if one was submitted.
    pub form_fill_ms: Option<f64>,
    pub form_field_count: Option<u32>,
}
