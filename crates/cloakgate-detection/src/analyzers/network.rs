use std::net::IpAddr;
use std::sync::OnceLock;

use ipnet::IpNet;

use cloakgate_core::detection::AnalyzerResult;
use cloakgate_core::visitor::VisitorDescriptor;

use super::NetworkContext;
use crate::threat::ThreatAssessment;

/// Well-known hosting / cloud prefixes. Traffic from these ranges is almost
/// never a person on a residential connection.
const DATACENTER_PREFIXES: &[&str] = &[
    // AWS
    "3.0.0.0/9",
    "13.32.0.0/12",
    "18.128.0.0/9",
    "52.0.0.0/10",
    "54.64.0.0/11",
    // Google Cloud
    "34.64.0.0/10",
    "35.184.0.0/13",
    "104.154.0.0/15",
    "130.211.0.0/16",
    // Azure
    "13.64.0.0/11",
    "20.33.0.0/16",
    "40.64.0.0/10",
    "52.224.0.0/11",
    // DigitalOcean
    "104.131.0.0/16",
    "134.209.0.0/16",
    "138.68.0.0/16",
    "159.65.0.0/16",
    "167.99.0.0/16",
    // OVH
    "51.38.0.0/16",
    "51.68.0.0/16",
    "51.77.0.0/16",
    "141.94.0.0/16",
    // Hetzner
    "65.108.0.0/15",
    "88.198.0.0/16",
    "95.216.0.0/16",
    "135.181.0.0/16",
    "168.119.0.0/16",
];

const PROXY_TOPOLOGY_HEADERS: &[&str] = &[
    "x-forwarded-for",
    "x-real-ip",
    "via",
    "forwarded",
    "x-forwarded-host",
];

fn datacenter_table() -> &'static Vec<IpNet> {
    static TABLE: OnceLock<Vec<IpNet>> = OnceLock::new();
    TABLE.get_or_init(|| {
        DATACENTER_PREFIXES
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect()
    })
}

fn ip_class_flag(ip: IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => {
            if v4.is_loopback() {
                Some("loopback_ip_address")
            } else if v4.is_private() {
                Some("private_ip_address")
            } else if v4.is_link_local() || v4.is_broadcast() || v4.is_documentation() {
                Some("reserved_ip_address")
            } else {
                None
            }
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() {
                Some("loopback_ip_address")
            } else if (v6.segments()[0] & 0xfe00) == 0xfc00 {
                // unique-local fc00::/7
                Some("private_ip_address")
            } else if (v6.segments()[0] & 0xffc0) == 0xfe80 {
                Some("reserved_ip_address")
            } else {
                None
            }
        }
    }
}

/// Scores by IP class, datacenter membership, TOR membership, proxy-header
/// topology, and the threat-intel aggregate. The base is the strongest class
/// signal; topology and the provider input are additive on top.
pub fn analyze(
    descriptor: &VisitorDescriptor,
    ctx: &NetworkContext,
    threat: Option<&ThreatAssessment>,
) -> AnalyzerResult {
    let mut flags = Vec::new();
    let mut base: f64 = 0.0;
    let mut confidence: f64 = 0.6;

    match descriptor.ip_addr {
        None => {
            flags.push("unparseable_ip".to_string());
            base = 0.5;
            confidence = 0.7;
        }
        Some(ip) => {
            if let Some(flag) = ip_class_flag(ip) {
                flags.push(flag.to_string());
                base = 0.9;
                confidence = 0.95;
            }
            if ctx.tor_exits.contains(&ip) {
                flags.push("tor_exit_node".to_string());
                base = base.max(0.9);
                confidence = confidence.max(0.9);
            }
            if datacenter_table().iter().any(|net| net.contains(&ip)) {
                flags.push("datacenter_ip".to_string());
                base = base.max(0.7);
                confidence = confidence.max(0.8);
            }
        }
    }

    let proxy_headers = PROXY_TOPOLOGY_HEADERS
        .iter()
        .filter(|h| descriptor.has_header(h))
        .count();
    let mut score = base;
    if proxy_headers >= 2 {
        flags.push("proxy_header_topology".to_string());
        score += 0.1;
    }

    if let Some(threat) = threat {
        // A zero-confidence aggregate means no provider actually answered;
        // it contributes exactly nothing, leaving the score as it would be
        // without the provider.
        if threat.confidence > 0.0 {
            let contribution = threat.score / 100.0 * 0.15;
            if contribution > 0.0 {
                score += contribution;
                flags.push("threat_intel_score".to_string());
                confidence = confidence.max(0.75);
            }
        } else if threat
            .categories
            .iter()
            .any(|c| c == "no_provider_response")
        {
            // Operator chose fallback=block: provider silence is suspicious.
            score = score.max(0.5);
            flags.push("threat_fallback_block".to_string());
        }
        for category in &threat.categories {
            flags.push(format!("threat_category:{category}"));
        }
    }

    let mut result = AnalyzerResult::scored(score.min(1.0), confidence);
    result.flags = flags;
    if let Some(threat) = threat {
        result = result.with_detail("threat_score", threat.score);
    }
    result
}
