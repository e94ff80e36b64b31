use std::collections::HashMap;
use std::net::IpAddr;

use sha2::{Digest, Sha256};

use crate::fingerprint::Fingerprint;

/// Request headers the descriptor retains, already lowercased.
///
/// Everything else is dropped at extraction time so analyzers index a small,
/// known key set.
pub const RETAINED_HEADERS: &[&str] = &[
    "accept",
    "accept-language",
    "accept-encoding",
    "dnt",
    "connection",
    "upgrade-insecure-requests",
    "x-forwarded-for",
    "x-real-ip",
    "via",
    "forwarded",
    "sec-ch-ua",
    "sec-ch-ua-mobile",
    "sec-ch-ua-platform",
    "sec-fetch-dest",
    "sec-fetch-mode",
    "sec-fetch-site",
    "cache-control",
    "pragma",
];

/// Automation- and proxy-signal headers also retained for the analyzers.
/// These never appear in organic browser traffic; their mere presence is a
/// detection input.
pub const SIGNAL_HEADERS: &[&str] = &[
    "x-originating-ip",
    "x-forwarded-host",
    "x-proxy-connection",
    "x-automation",
    "x-bot",
    "x-crawler",
    "x-debug",
    "x-test",
    "x-requested-with",
    "x-webdriver",
    "x-selenium",
    "x-puppeteer",
    "x-playwright",
    "webdriver-active",
    "x-chrome-connected",
    "x-devtools-emulate-network-conditions-client-id",
];

/// Parsed User-Agent fields. All optional — an unparseable UA leaves the
/// descriptor with `ua: None`, never an error.
#[derive(Debug, Clone)]
pub struct UaInfo {
    pub browser: String,
    pub browser_version: Option<String>,
    pub os: String,
    pub os_version: Option<String>,
    pub device_type: String,
}

#[derive(Debug, Clone)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Everything the decision pipeline knows about one inbound request.
///
/// Built once per request by the extractor and immutable afterwards.
#[derive(Debug, Clone)]
pub struct VisitorDescriptor {
    /// Canonical textual form of the client IP.
    pub ip: String,
    /// Numeric form for range operations; `None` when the socket metadata
    /// was unavailable and no forwarded header parsed.
    pub ip_addr: Option<IpAddr>,
    pub user_agent: String,
    pub ua: Option<UaInfo>,
    pub referrer: Option<String>,
    /// Lowercase-keyed subset of request headers, per [`RETAINED_HEADERS`].
    pub headers: HashMap<String, String>,
    pub fingerprint: Option<Fingerprint>,
    pub geo: Option<GeoInfo>,
    /// Stable 128-bit digest identifying the visitor; see [`fingerprint_hash`].
    pub fingerprint_hash: String,
}

impl VisitorDescriptor {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }
}

/// Compute the visitor fingerprint hash.
///
/// Formula: sha256 over a deterministic concatenation of the canonical IP,
/// the raw User-Agent, the accept / accept-language / accept-encoding header
/// values, and the canvas/webgl/audio hashes when a fingerprint is present.
/// The first 16 bytes are hex-encoded — a 128-bit, 32-character id.
///
/// Same inputs always produce the same hash; it doubles as the visitor id in
/// traffic records and as the decision-cache key component.
pub fn fingerprint_hash(
    ip: &str,
    user_agent: &str,
    headers: &HashMap<String, String>,
    fingerprint: Option<&Fingerprint>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hasher.update([0u8]);
    hasher.update(user_agent.as_bytes());
    for name in ["accept", "accept-language", "accept-encoding"] {
        hasher.update([0u8]);
        if let Some(value) = headers.get(name) {
            hasher.update(value.as_bytes());
        }
    }
    if let Some(fp) = fingerprint {
        for sub_hash in [
            fp.canvas.as_ref().and_then(|c| c.hash.as_deref()),
            fp.webgl.as_ref().and_then(|w| w.hash.as_deref()),
            fp.audio.as_ref().and_then(|a| a.context_hash.as_deref()),
            fp.audio.as_ref().and_then(|a| a.oscillator_hash.as_deref()),
            fp.audio.as_ref().and_then(|a| a.dynamics_hash.as_deref()),
        ] {
            hasher.update([0u8]);
            if let Some(h) = sub_hash {
                hasher.update(h.as_bytes());
            }
        }
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}
