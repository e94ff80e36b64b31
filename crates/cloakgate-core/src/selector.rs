use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use sha2::{Digest, Sha256};

use crate::campaign::Stream;
use crate::rules::stream_passes;
use crate::visitor::VisitorDescriptor;

/// Streams that may receive this visitor: active, weight > 0, and the
/// targeting rules pass. Order is stable (ascending id) so the cumulative
/// scan in [`select_stream`] is deterministic.
pub fn eligible_streams<'a>(
    streams: &'a [Stream],
    descriptor: &VisitorDescriptor,
) -> Vec<&'a Stream> {
    let mut eligible: Vec<&Stream> = streams
        .iter()
        .filter(|s| s.active && s.weight > 0 && stream_passes(&s.rules, descriptor))
        .collect();
    eligible.sort_by(|a, b| a.id.cmp(&b.id));
    eligible
}

/// Draw seed derived from (campaign, visitor, wall-clock minute).
///
/// Two requests racing on the same decision-cache miss land in the same
/// minute and therefore draw the same stream, keeping cached and freshly
/// computed decisions identical without single-flighting the pipeline.
fn draw_seed(campaign_id: &str, fingerprint_hash: &str, now_minute: i64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(campaign_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(fingerprint_hash.as_bytes());
    hasher.update([0u8]);
    hasher.update(now_minute.to_be_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Weighted pick among eligible streams.
///
/// r is uniform in [0, total_weight); the scan accumulates weights in
/// ascending-id order and picks the stream whose range contains r. Returns
/// `None` when nothing is eligible — the composer then falls back to the
/// campaign's base URLs.
pub fn select_stream<'a>(
    campaign_id: &str,
    fingerprint_hash: &str,
    streams: &'a [Stream],
    descriptor: &VisitorDescriptor,
) -> Option<&'a Stream> {
    let eligible = eligible_streams(streams, descriptor);
    if eligible.is_empty() {
        return None;
    }
    let total: u64 = eligible.iter().map(|s| u64::from(s.weight)).sum();
    let now_minute = Utc::now().timestamp() / 60;
    let mut rng = StdRng::seed_from_u64(draw_seed(campaign_id, fingerprint_hash, now_minute));
    let r = rng.gen_range(0..total);
    let mut cumulative = 0u64;
    for stream in &eligible {
        cumulative += u64::from(stream.weight);
        if r < cumulative {
            return Some(stream);
        }
    }
    // Unreachable while r < total, but the compiler cannot know that.
    eligible.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn descriptor() -> VisitorDescriptor {
        VisitorDescriptor {
            ip: "198.51.100.7".to_string(),
            ip_addr: "198.51.100.7".parse().ok(),
            user_agent: "Mozilla/5.0".to_string(),
            ua: None,
            referrer: None,
            headers: HashMap::new(),
            fingerprint: None,
            geo: None,
            fingerprint_hash: "ab".repeat(16),
        }
    }

    fn stream(id: &str, weight: u32, active: bool) -> Stream {
        Stream {
            id: id.to_string(),
            campaign_id: "c1".to_string(),
            name: format!("stream {id}"),
            weight,
            active,
            money_url: None,
            safe_url: None,
            rules: Vec::new(),
        }
    }

    #[test]
    fn zero_weight_streams_are_ineligible() {
        let streams = vec![stream("s1", 0, true), stream("s2", 0, true)];
        assert!(select_stream("c1", "fp", &streams, &descriptor()).is_none());
    }

    #[test]
    fn inactive_streams_are_ineligible() {
        let streams = vec![stream("s1", 10, false)];
        assert!(select_stream("c1", "fp", &streams, &descriptor()).is_none());
    }

    #[test]
    fn single_eligible_stream_always_wins() {
        let streams = vec![stream("s1", 1, true), stream("s2", 0, true)];
        let picked = select_stream("c1", "fp", &streams, &descriptor());
        assert_eq!(picked.map(|s| s.id.as_str()), Some("s1"));
    }

    #[test]
    fn selection_is_deterministic_within_a_minute() {
        let streams = vec![
            stream("s1", 3, true),
            stream("s2", 5, true),
            stream("s3", 2, true),
        ];
        let d = descriptor();
        let first = select_stream("c1", &d.fingerprint_hash, &streams, &d).map(|s| s.id.clone());
        for _ in 0..20 {
            let again =
                select_stream("c1", &d.fingerprint_hash, &streams, &d).map(|s| s.id.clone());
            assert_eq!(first, again);
        }
    }

    #[test]
    fn weights_are_respected_in_distribution() {
        // Vary the fingerprint hash to simulate distinct visitors; the draw
        // should land on s2 roughly weight(s2)/total of the time.
        let streams = vec![stream("s1", 1, true), stream("s2", 3, true)];
        let mut s2_hits = 0u32;
        let n = 2000u32;
        for i in 0..n {
            let mut d = descriptor();
            d.fingerprint_hash = format!("{i:032x}");
            if let Some(s) = select_stream("c1", &d.fingerprint_hash, &streams, &d) {
                if s.id == "s2" {
                    s2_hits += 1;
                }
            }
        }
        let frequency = f64::from(s2_hits) / f64::from(n);
        assert!(
            (frequency - 0.75).abs() < 0.05,
            "expected ~0.75 share for weight-3 stream, got {frequency}"
        );
    }
}
