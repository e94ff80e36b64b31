use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use tracing::warn;

use cloakgate_core::config::Config;
use cloakgate_core::fingerprint::Fingerprint;
use cloakgate_core::visitor::{
    fingerprint_hash, GeoInfo, UaInfo, VisitorDescriptor, RETAINED_HEADERS, SIGNAL_HEADERS,
};

/// In-process GeoIP database, loaded once at startup.
///
/// A missing .mmdb file is logged and tolerated — descriptors then carry no
/// geo fields, and country targeting rules simply never match.
pub struct GeoDb {
    reader: Option<maxminddb::Reader<Vec<u8>>>,
}

impl GeoDb {
    pub fn load(path: &str) -> Self {
        if !std::path::Path::new(path).exists() {
            warn!(
                geoip_path = %path,
                "GeoIP database not found; visitors resolve without geo fields"
            );
            return Self { reader: None };
        }
        let reader = std::fs::read(path)
            .ok()
            .and_then(|bytes| maxminddb::Reader::from_source(bytes).ok());
        if reader.is_none() {
            warn!(geoip_path = %path, "GeoIP database unreadable; continuing without");
        }
        Self { reader }
    }

    pub fn lookup(&self, ip: IpAddr) -> Option<GeoInfo> {
        let reader = self.reader.as_ref()?;
        let lookup = reader.lookup(ip).ok()?;
        let record = lookup.decode::<maxminddb::geoip2::City>().ok().flatten()?;
        Some(GeoInfo {
            country: record.country.iso_code.map(|s| s.to_string()),
            region: record
                .subdivisions
                .first()
                .and_then(|sub| sub.names.english)
                .map(|s| s.to_string()),
            city: record.city.names.english.map(|s| s.to_string()),
            latitude: record.location.latitude,
            longitude: record.location.longitude,
        })
    }
}

/// Select the client IP.
///
/// The direct peer address is authoritative unless it belongs to a
/// configured trusted proxy, in which case the first X-Forwarded-For entry
/// (or X-Real-IP) speaks for the client.
pub fn extract_client_ip(
    config: &Config,
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
) -> (String, Option<IpAddr>) {
    let forwarded = forwarded_ip(headers);
    if let Some(addr) = remote_addr {
        let peer = addr.ip();
        if config.trusted_proxies.iter().any(|net| net.contains(&peer)) {
            let ip = forwarded.unwrap_or(peer);
            return (ip.to_string(), Some(ip));
        }
        return (peer.to_string(), Some(peer));
    }
    match forwarded {
        Some(ip) => (ip.to_string(), Some(ip)),
        None => ("unknown".to_string(), None),
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
        })
}

/// Lowercase and retain only the allow-listed plus signal headers.
pub fn retained_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for name in RETAINED_HEADERS.iter().chain(SIGNAL_HEADERS.iter()) {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            map.insert((*name).to_string(), value.to_string());
        }
    }
    map
}

/// Parse a `User-Agent` string via the `woothee` crate.
///
/// Returns `None` when the string is empty or unclassifiable; the UA
/// analyzer treats that as its own signal.
pub fn parse_user_agent(user_agent: &str) -> Option<UaInfo> {
    if user_agent.is_empty() {
        return None;
    }
    let result = woothee::parser::Parser::new().parse(user_agent)?;
    if result.name == "UNKNOWN" {
        return None;
    }

    // woothee categories map to the targeting-rule device vocabulary:
    // pc → desktop, smartphone/mobilephone → mobile, tablet → tablet.
    let device_type = match result.category {
        "smartphone" | "mobilephone" => "mobile",
        "tablet" => "tablet",
        _ => "desktop",
    }
    .to_string();

    let browser_version = if result.version.is_empty() {
        None
    } else {
        Some(result.version.to_string())
    };
    let os_version = if result.os_version.is_empty() {
        None
    } else {
        Some(result.os_version.to_string())
    };

    Some(UaInfo {
        browser: result.name.to_string(),
        browser_version,
        os: result.os.to_string(),
        os_version,
        device_type,
    })
}

/// Parse the optional POST body into a fingerprint.
///
/// Anything structurally wrong — not JSON, no object, wrong nesting — is
/// treated as absent, never as a rejection.
pub fn parse_fingerprint_body(body: &[u8]) -> Option<Fingerprint> {
    if body.is_empty() {
        return None;
    }
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let fingerprint = value.get("fingerprint")?;
    if !fingerprint.is_object() {
        return None;
    }
    serde_json::from_value(fingerprint.clone()).ok()
}

/// Build the full descriptor for one request.
pub fn build_descriptor(
    config: &Config,
    geo_db: &GeoDb,
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    fingerprint: Option<Fingerprint>,
) -> VisitorDescriptor {
    let (ip, ip_addr) = extract_client_ip(config, headers, remote_addr);
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let referrer = headers
        .get(axum::http::header::REFERER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let retained = retained_headers(headers);
    let geo = ip_addr.and_then(|ip| geo_db.lookup(ip));
    let hash = fingerprint_hash(&ip, &user_agent, &retained, fingerprint.as_ref());

    VisitorDescriptor {
        ip,
        ip_addr,
        ua: parse_user_agent(&user_agent),
        user_agent,
        referrer,
        headers: retained,
        fingerprint,
        geo,
        fingerprint_hash: hash,
    }
}
