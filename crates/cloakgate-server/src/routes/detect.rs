use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue},
    Json,
};
use serde::{Deserialize, Serialize};

use cloakgate_core::fingerprint::Fingerprint;
use cloakgate_core::store::CampaignStore;

use crate::error::AppError;
use crate::extract::build_descriptor;
use crate::routes::decide::MaybeConnectInfo;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectRequest {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub fingerprint: Option<Fingerprint>,
    pub campaign_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectResponse {
    pub decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub details: DetectDetails,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectDetails {
    pub is_bot: bool,
    pub bot_confidence: f64,
    pub is_threat: bool,
    pub threat_score: f64,
    pub is_blacklisted: bool,
    pub fingerprint_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ja3_match: Option<bool>,
}

/// `POST /detect` — programmatic classification without a redirect.
///
/// The caller supplies the request material (headers, optional fingerprint);
/// the pipeline runs exactly as on the public endpoint. This is the only
/// surface where internal failures reach the caller, as a 500.
#[tracing::instrument(skip(state, request))]
pub async fn detect(
    State(state): State<Arc<AppState>>,
    maybe_connect_info: MaybeConnectInfo,
    Json(request): Json<DetectRequest>,
) -> Result<Json<DetectResponse>, AppError> {
    let started = Instant::now();
    let deadline = started + state.config.request_budget();

    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.to_lowercase().as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    let descriptor = Arc::new(build_descriptor(
        &state.config,
        &state.geo,
        &headers,
        maybe_connect_info.0,
        request.fingerprint,
    ));

    let blacklist_verdict = state.blacklist.is_blocked(&descriptor.ip).await;
    let outcome = state.engine.analyze(Arc::clone(&descriptor), deadline).await;

    let threat = match &state.threat {
        Some(service) => Some(service.assess(&descriptor.ip, deadline).await),
        None => None,
    };
    let (is_threat, threat_score) = threat
        .as_ref()
        .map(|t| (t.malicious, t.score))
        .unwrap_or((false, 0.0));

    let campaign = match &request.campaign_id {
        Some(campaign_id) => state.db.campaign_by_id(campaign_id).await?,
        None => None,
    };

    let blocked = blacklist_verdict.blocked || outcome.is_bot || is_threat;
    let reason = if blacklist_verdict.blocked {
        Some(
            blacklist_verdict
                .reason
                .clone()
                .unwrap_or_else(|| "blacklisted".to_string()),
        )
    } else if blocked {
        Some(outcome.primary_reason.clone())
    } else {
        None
    };
    let redirect_url = campaign.map(|c| {
        if blocked || !c.is_active() {
            c.safe_url
        } else {
            c.money_url
        }
    });

    let fingerprint_score = outcome
        .analyzer_scores
        .get("fingerprint")
        .copied()
        .unwrap_or(0.0);
    let ja3_match = descriptor
        .fingerprint
        .as_ref()
        .and_then(|fp| fp.ja3.as_ref())
        .map(|_| false);

    Ok(Json(DetectResponse {
        decision: if blocked { "block" } else { "pass" },
        reason,
        confidence: outcome.confidence,
        redirect_url,
        details: DetectDetails {
            is_bot: outcome.is_bot,
            bot_confidence: outcome.confidence,
            is_threat,
            threat_score,
            is_blacklisted: blacklist_verdict.blocked,
            fingerprint_score,
            ja3_match,
        },
    }))
}
