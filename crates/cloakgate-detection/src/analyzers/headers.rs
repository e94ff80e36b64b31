use cloakgate_core::detection::AnalyzerResult;
use cloakgate_core::visitor::VisitorDescriptor;

/// Suspicious-header penalty table. The second column is the weight added to
/// the accumulated sum when the header is present.
const SUSPICIOUS_HEADERS: &[(&str, f64)] = &[
    ("x-forwarded-for", 1.5),
    ("x-real-ip", 1.5),
    ("x-originating-ip", 1.5),
    ("x-forwarded-host", 1.5),
    ("via", 1.5),
    ("forwarded", 1.5),
    ("x-proxy-connection", 2.0),
    ("x-automation", 3.0),
    ("x-bot", 3.0),
    ("x-crawler", 3.0),
    ("x-debug", 1.0),
    ("x-test", 1.0),
];

/// Weight added per UA-vs-header inconsistency.
const INCONSISTENCY_WEIGHT: f64 = 2.0;

const BASELINE_HEADERS: &[&str] = &["accept", "accept-language", "accept-encoding"];

fn max_suspicious_sum() -> f64 {
    SUSPICIOUS_HEADERS.iter().map(|(_, w)| w).sum()
}

/// Cross-checks between the parsed UA and header claims. Real browsers never
/// contradict themselves here.
fn inconsistency_flags(descriptor: &VisitorDescriptor) -> Vec<String> {
    let mut flags = Vec::new();
    let browser = descriptor
        .ua
        .as_ref()
        .map(|u| u.browser.to_lowercase())
        .unwrap_or_default();

    if let Some(requested_with) = descriptor.header("x-requested-with") {
        let claimed = requested_with.to_lowercase();
        for other in ["chrome", "firefox", "safari", "edge"] {
            if claimed.contains(other) && !browser.is_empty() && !browser.contains(other) {
                flags.push("header_ua_mismatch:x-requested-with".to_string());
                break;
            }
        }
    }
    if let Some(client_hint) = descriptor.header("sec-ch-ua") {
        let hint = client_hint.to_lowercase();
        if browser.contains("firefox") && hint.contains("chrom") {
            flags.push("header_ua_mismatch:sec-ch-ua".to_string());
        }
        if browser.contains("chrome") && hint.contains("firefox") {
            flags.push("header_ua_mismatch:sec-ch-ua".to_string());
        }
    }
    // sec-ch-ua-mobile claims mobile but the UA parsed as desktop.
    if descriptor.header("sec-ch-ua-mobile") == Some("?1") {
        if let Some(ua) = descriptor.ua.as_ref() {
            if ua.device_type == "desktop" {
                flags.push("header_ua_mismatch:sec-ch-ua-mobile".to_string());
            }
        }
    }
    flags
}

pub fn analyze(descriptor: &VisitorDescriptor) -> AnalyzerResult {
    let mut weighted_sum = 0.0;
    let mut flags = Vec::new();

    for (name, weight) in SUSPICIOUS_HEADERS {
        if descriptor.has_header(name) {
            weighted_sum += weight;
            flags.push(format!("suspicious_header:{name}"));
        }
    }

    let inconsistencies = inconsistency_flags(descriptor);
    weighted_sum += INCONSISTENCY_WEIGHT * inconsistencies.len() as f64;
    flags.extend(inconsistencies);

    let mut missing = 0usize;
    for name in BASELINE_HEADERS {
        if !descriptor.has_header(name) {
            missing += 1;
            flags.push(format!("missing_header:{name}"));
        }
    }
    if descriptor.user_agent.trim().is_empty() {
        missing += 1;
        flags.push("missing_header:user-agent".to_string());
    }
    let missing_fraction = missing as f64 / 4.0;

    let score = (weighted_sum / (max_suspicious_sum() + 1.5) * 0.7 + missing_fraction * 0.3)
        .min(1.0);

    let confidence = if flags.is_empty() {
        0.9
    } else {
        (0.6 + 0.05 * flags.len() as f64).min(0.9)
    };

    let mut result = AnalyzerResult::scored(score, confidence);
    result.flags = flags;
    result
}
