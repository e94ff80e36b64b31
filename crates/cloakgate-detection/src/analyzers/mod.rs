//! The analyzer bank: six independent scorers over a [`VisitorDescriptor`].
//!
//! Analyzers are pure — no I/O, no shared mutable state. The network
//! analyzer's threat-intel input is fetched once by the engine and passed in,
//! so every analyzer stays a plain function the engine can fan out and join
//! under the request deadline.

pub mod behavior;
pub mod fingerprint;
pub mod headers;
pub mod headless;
pub mod network;
pub mod user_agent;

use cloakgate_core::config::DetectionTuning;
use cloakgate_core::detection::{AnalyzerKind, AnalyzerResult};
use cloakgate_core::visitor::VisitorDescriptor;

use crate::threat::ThreatAssessment;

/// Static inputs the network analyzer needs beyond the descriptor.
#[derive(Debug, Default)]
pub struct NetworkContext {
    /// TOR exit node IPs, loaded at startup. Empty when not configured.
    pub tor_exits: std::collections::HashSet<std::net::IpAddr>,
}

/// Run one analyzer by kind. The engine calls this from parallel tasks.
pub fn run(
    kind: AnalyzerKind,
    descriptor: &VisitorDescriptor,
    tuning: &DetectionTuning,
    network_ctx: &NetworkContext,
    threat: Option<&ThreatAssessment>,
) -> AnalyzerResult {
    match kind {
        AnalyzerKind::UserAgent => user_agent::analyze(descriptor, &tuning.outdated),
        AnalyzerKind::Headers => headers::analyze(descriptor),
        AnalyzerKind::Network => network::analyze(descriptor, network_ctx, threat),
        AnalyzerKind::Fingerprint => fingerprint::analyze(descriptor),
        AnalyzerKind::Headless => headless::analyze(descriptor),
        AnalyzerKind::Behavior => behavior::analyze(descriptor),
    }
}
