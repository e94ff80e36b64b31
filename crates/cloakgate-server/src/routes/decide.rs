use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};

use cloakgate_core::decision::{compose, compose_blocked, Decision};
use cloakgate_core::selector::select_stream;

use crate::error::AppError;
use crate::extract::{build_descriptor, parse_fingerprint_body};
use crate::responder::respond;
use crate::state::AppState;

/// Socket metadata is absent when the router is driven without a real
/// listener (tests, `oneshot`); IP extraction then falls back to headers.
#[derive(Debug)]
pub struct MaybeConnectInfo(pub Option<SocketAddr>);

impl<S> FromRequestParts<S> for MaybeConnectInfo
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0),
        ))
    }
}

fn cors_preflight() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            ("access-control-allow-origin", HeaderValue::from_static("*")),
            (
                "access-control-allow-methods",
                HeaderValue::from_static("GET, POST, OPTIONS"),
            ),
            (
                "access-control-allow-headers",
                HeaderValue::from_static("Content-Type, Authorization"),
            ),
        ],
        (),
    )
        .into_response()
}

/// `ANY /{slug}` — the public decision endpoint.
///
/// GET carries no fingerprint; POST may carry `{"fingerprint": {...}}`.
/// Whatever happens inside — store failures, analyzer failures, deadline
/// overruns — the visitor receives a well-formed redirect or HTML page.
#[tracing::instrument(skip(state, headers, body), fields(slug = %slug))]
pub async fn decide(
    State(state): State<Arc<AppState>>,
    maybe_connect_info: MaybeConnectInfo,
    Path(slug): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        return cors_preflight();
    }

    let started = Instant::now();
    let deadline = started + state.config.request_budget();

    // Fingerprint only on POST; malformed bodies count as absent.
    let fingerprint = if method == Method::POST {
        parse_fingerprint_body(&body)
    } else {
        None
    };
    let descriptor = Arc::new(build_descriptor(
        &state.config,
        &state.geo,
        &headers,
        maybe_connect_info.0,
        fingerprint,
    ));

    let Some(campaign) = state.resolver.resolve_by_slug(&slug).await else {
        return respond(&Decision::campaign_not_found(&state.config.not_found_url));
    };

    if let Some(mut cached) = state
        .decision_cache
        .get(&campaign, &descriptor.fingerprint_hash)
        .await
    {
        cached.elapsed_micros = started.elapsed().as_micros() as u64;
        state.record_traffic(&descriptor, &cached);
        return respond(&cached);
    }

    let verdict = state.blacklist.is_blocked(&descriptor.ip).await;
    if verdict.blocked {
        let reason = verdict.reason.as_deref().unwrap_or("blacklisted");
        let mut decision = compose_blocked(&campaign, &state.config.block_url, reason);
        decision.elapsed_micros = started.elapsed().as_micros() as u64;
        state.record_traffic(&descriptor, &decision);
        return respond(&decision);
    }

    // A hard threat-intel verdict short-circuits like the blacklist does.
    // The assessment is cached per IP, so the engine's own network input
    // reuses it rather than spending a second provider call.
    if let Some(service) = &state.threat {
        let assessment = service.assess(&descriptor.ip, deadline).await;
        if assessment.malicious && assessment.confidence > 0.0 {
            let mut decision =
                compose_blocked(&campaign, &state.config.block_url, "threat_intel");
            decision.elapsed_micros = started.elapsed().as_micros() as u64;
            state.record_traffic(&descriptor, &decision);
            return respond(&decision);
        }
    }

    let outcome = state.engine.analyze(Arc::clone(&descriptor), deadline).await;

    let streams = state.resolver.streams_for(&campaign.id).await;
    let stream = select_stream(
        &campaign.id,
        &descriptor.fingerprint_hash,
        &streams,
        &descriptor,
    );

    let mut decision = compose(&campaign, stream, &outcome);
    decision.elapsed_micros = started.elapsed().as_micros() as u64;

    state
        .decision_cache
        .store(&campaign, &descriptor.fingerprint_hash, &decision)
        .await;

    state.record_traffic(&descriptor, &decision);
    respond(&decision)
}
