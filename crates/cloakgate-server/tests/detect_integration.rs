use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use cloakgate_core::campaign::{Campaign, CampaignStatus, RedirectKind};
use cloakgate_core::config::Config;
use cloakgate_core::store::MemoryStore;
use cloakgate_duckdb::DuckDbBackend;
use cloakgate_server::app::build_app;
use cloakgate_server::state::AppState;

const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn config() -> Config {
    let mut config = Config::default();
    config.geoip_path = "/nonexistent/GeoLite2-City.mmdb".to_string();
    config.detection.request_budget_ms = 5_000;
    config
}

async fn setup() -> (Arc<AppState>, axum::Router) {
    let db = DuckDbBackend::open_in_memory().expect("in-memory db");
    let state = Arc::new(AppState::new(config(), db, Arc::new(MemoryStore::new())));
    let app = build_app(Arc::clone(&state));
    (state, app)
}

async fn post_detect(app: &axum::Router, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/detect")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = serde_json::from_slice(&bytes).expect("json body");
    (status, value)
}

#[tokio::test]
async fn clean_headers_pass() {
    let (_state, app) = setup().await;
    let (status, body) = post_detect(
        &app,
        json!({
            "url": "https://landing.example/offer",
            "headers": {
                "user-agent": CHROME_UA,
                "accept": "text/html",
                "accept-language": "en-US",
                "accept-encoding": "gzip",
                "x-forwarded-for": "203.0.113.5"
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["decision"], "pass");
    assert_eq!(body["details"]["isBot"], false);
    assert_eq!(body["details"]["isBlacklisted"], false);
}

#[tokio::test]
async fn crawler_ua_blocks() {
    let (_state, app) = setup().await;
    let (status, body) = post_detect(
        &app,
        json!({
            "url": "https://landing.example/offer",
            "headers": {
                "user-agent": "curl/8.4.0",
                "x-forwarded-for": "203.0.113.5"
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["decision"], "block");
    assert_eq!(body["details"]["isBot"], true);
    assert!(body["reason"].is_string());
}

#[tokio::test]
async fn spoofed_fingerprint_blocks_with_fingerprint_score() {
    let (_state, app) = setup().await;
    let (status, body) = post_detect(
        &app,
        json!({
            "url": "https://landing.example/offer",
            "headers": {
                "user-agent": CHROME_UA,
                "accept": "text/html",
                "accept-language": "en-US",
                "accept-encoding": "gzip",
                "x-forwarded-for": "203.0.113.8"
            },
            "fingerprint": {
                "canvas": {"hash": "0000000000000000"},
                "webgl": {"renderer": "SwiftShader"},
                "environment": {"timezone": "UTC", "languages": ["en-US"], "plugins": []}
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["decision"], "block");
    assert!(body["details"]["fingerprintScore"].as_f64().expect("score") > 0.5);
}

#[tokio::test]
async fn campaign_id_resolves_the_redirect_url() {
    let (state, app) = setup().await;
    let now = chrono::Utc::now();
    state
        .db
        .create_campaign(&Campaign {
            id: "camp-api".to_string(),
            slug: "api-promo".to_string(),
            status: CampaignStatus::Active,
            money_url: "https://m.example/api".to_string(),
            safe_url: "https://s.example/api".to_string(),
            redirect_kind: RedirectKind::Http302,
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("seed");

    let (_, pass_body) = post_detect(
        &app,
        json!({
            "url": "https://landing.example/offer",
            "campaignId": "camp-api",
            "headers": {
                "user-agent": CHROME_UA,
                "accept": "text/html",
                "accept-language": "en-US",
                "accept-encoding": "gzip",
                "x-forwarded-for": "203.0.113.5"
            }
        }),
    )
    .await;
    assert_eq!(pass_body["redirectUrl"], "https://m.example/api");

    let (_, block_body) = post_detect(
        &app,
        json!({
            "url": "https://landing.example/offer",
            "campaignId": "camp-api",
            "headers": {
                "user-agent": "python-requests/2.31",
                "x-forwarded-for": "203.0.113.5"
            }
        }),
    )
    .await;
    assert_eq!(block_body["decision"], "block");
    assert_eq!(block_body["redirectUrl"], "https://s.example/api");
}

#[tokio::test]
async fn ja3_field_is_reflected_in_details() {
    let (_state, app) = setup().await;
    let (_, body) = post_detect(
        &app,
        json!({
            "url": "https://landing.example/offer",
            "headers": {
                "user-agent": CHROME_UA,
                "accept": "text/html",
                "accept-language": "en-US",
                "accept-encoding": "gzip",
                "x-forwarded-for": "203.0.113.5"
            },
            "fingerprint": { "ja3": "771,4865-4866,0-23-65281,29-23-24,0" }
        }),
    )
    .await;
    // No JA3 corpus is configured, so a supplied hash reports as unmatched.
    assert_eq!(body["details"]["ja3Match"], false);
}

#[tokio::test]
async fn malformed_body_is_a_client_error_not_a_crash() {
    let (_state, app) = setup().await;
    let request = Request::builder()
        .method("POST")
        .uri("/detect")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{broken"))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert!(response.status().is_client_error());
}
