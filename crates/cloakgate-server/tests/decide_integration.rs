use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use cloakgate_core::campaign::{
    BlacklistEntry, Campaign, CampaignStatus, DetectionKind, RedirectKind, RuleOperator,
    RuleType, RuleValue, Stream, TargetingRule,
};
use cloakgate_core::config::Config;
use cloakgate_core::store::MemoryStore;
use cloakgate_duckdb::DuckDbBackend;
use cloakgate_server::app::build_app;
use cloakgate_server::state::AppState;

const CHROME_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const HEADLESS_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                           (KHTML, like Gecko) HeadlessChrome/115.0 Safari/537.36";

fn config() -> Config {
    let mut config = Config::default();
    config.geoip_path = "/nonexistent/GeoLite2-City.mmdb".to_string();
    // Generous budget so CI scheduling jitter cannot time analyzers out.
    config.detection.request_budget_ms = 5_000;
    config
}

async fn setup() -> (Arc<AppState>, axum::Router) {
    let db = DuckDbBackend::open_in_memory().expect("in-memory db");
    let state = Arc::new(AppState::new(config(), db, Arc::new(MemoryStore::new())));
    let app = build_app(Arc::clone(&state));
    (state, app)
}

fn campaign(slug: &str, kind: RedirectKind) -> Campaign {
    let now = chrono::Utc::now();
    Campaign {
        id: format!("camp-{slug}"),
        slug: slug.to_string(),
        status: CampaignStatus::Active,
        money_url: "https://m.example/a".to_string(),
        safe_url: "https://s.example/a".to_string(),
        redirect_kind: kind,
        created_at: now,
        updated_at: now,
    }
}

fn get_request(slug: &str, ip: &str, user_agent: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(format!("/{slug}"))
        .header("x-forwarded-for", ip)
        .header(header::USER_AGENT, user_agent)
        .header(header::ACCEPT, "text/html,application/xhtml+xml")
        .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
        .header(header::ACCEPT_ENCODING, "gzip, deflate, br")
        .body(Body::empty())
        .expect("request")
}

fn location(response: &axum::http::Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

#[tokio::test]
async fn headless_chrome_is_sent_to_the_safe_page() {
    let (state, app) = setup().await;
    state
        .db
        .create_campaign(&campaign("promo-1", RedirectKind::Http302))
        .await
        .expect("seed");

    let response = app
        .oneshot(get_request("promo-1", "8.8.8.8", HEADLESS_UA))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "https://s.example/a");
}

#[tokio::test]
async fn clean_browser_is_sent_to_the_money_page() {
    let (state, app) = setup().await;
    state
        .db
        .create_campaign(&campaign("promo-1", RedirectKind::Http302))
        .await
        .expect("seed");

    let response = app
        .oneshot(get_request("promo-1", "203.0.113.5", CHROME_UA))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "https://m.example/a");
}

#[tokio::test]
async fn spoofed_fingerprint_is_sent_to_the_safe_page() {
    let (state, app) = setup().await;
    state
        .db
        .create_campaign(&campaign("promo-2", RedirectKind::Http302))
        .await
        .expect("seed");

    let body = json!({
        "fingerprint": {
            "canvas": {"hash": "0000000000000000"},
            "webgl": {"renderer": "SwiftShader"},
            "environment": {"timezone": "UTC", "languages": ["en-US"], "plugins": []}
        }
    });
    let request = Request::builder()
        .method("POST")
        .uri("/promo-2")
        .header("x-forwarded-for", "203.0.113.7")
        .header(header::USER_AGENT, CHROME_UA)
        .header(header::ACCEPT, "text/html")
        .header(header::ACCEPT_LANGUAGE, "en-US")
        .header(header::ACCEPT_ENCODING, "gzip")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");

    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "https://s.example/a");
}

#[tokio::test]
async fn private_ip_is_sent_to_the_safe_page() {
    let (state, app) = setup().await;
    state
        .db
        .create_campaign(&campaign("promo-3", RedirectKind::Http302))
        .await
        .expect("seed");

    let response = app
        .oneshot(get_request("promo-3", "10.0.0.5", CHROME_UA))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "https://s.example/a");
}

#[tokio::test]
async fn unknown_slug_redirects_to_the_fallback() {
    let (_state, app) = setup().await;
    let response = app
        .oneshot(get_request("nonexistent", "203.0.113.5", CHROME_UA))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/404");
}

#[tokio::test]
async fn parallel_identical_requests_agree() {
    let (state, app) = setup().await;
    state
        .db
        .create_campaign(&campaign("promo-4", RedirectKind::Http302))
        .await
        .expect("seed");

    let (a, b) = tokio::join!(
        app.clone()
            .oneshot(get_request("promo-4", "203.0.113.5", CHROME_UA)),
        app.clone()
            .oneshot(get_request("promo-4", "203.0.113.5", CHROME_UA)),
    );
    let a = a.expect("response");
    let b = b.expect("response");
    assert_eq!(a.status(), b.status());
    assert_eq!(location(&a), location(&b));
}

#[tokio::test]
async fn repeated_requests_reuse_the_cached_decision() {
    let (state, app) = setup().await;
    state
        .db
        .create_campaign(&campaign("promo-5", RedirectKind::Http302))
        .await
        .expect("seed");

    let first = app
        .clone()
        .oneshot(get_request("promo-5", "203.0.113.5", CHROME_UA))
        .await
        .expect("response");
    let second = app
        .clone()
        .oneshot(get_request("promo-5", "203.0.113.5", CHROME_UA))
        .await
        .expect("response");
    assert_eq!(first.status(), second.status());
    assert_eq!(location(&first), location(&second));
}

#[tokio::test]
async fn options_preflight_gets_cors_headers() {
    let (_state, app) = setup().await;
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/promo-1")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let headers = response.headers();
    assert_eq!(
        headers
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    assert_eq!(
        headers
            .get("access-control-allow-methods")
            .and_then(|v| v.to_str().ok()),
        Some("GET, POST, OPTIONS")
    );
}

#[tokio::test]
async fn paused_campaign_never_shows_the_money_page() {
    let (state, app) = setup().await;
    let mut paused = campaign("promo-6", RedirectKind::Http302);
    paused.status = CampaignStatus::Paused;
    state.db.create_campaign(&paused).await.expect("seed");

    let response = app
        .oneshot(get_request("promo-6", "203.0.113.5", CHROME_UA))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "https://s.example/a");
}

#[tokio::test]
async fn js_redirect_kind_escapes_the_url() {
    let (state, app) = setup().await;
    let mut js_campaign = campaign("promo-7", RedirectKind::Js);
    js_campaign.money_url = "https://m.example/a?q='<&>".to_string();
    state.db.create_campaign(&js_campaign).await.expect("seed");

    let response = app
        .oneshot(get_request("promo-7", "203.0.113.5", CHROME_UA))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("no-store")
    );
    let body = body_string(response).await;
    assert!(body.contains("https://m.example/a?q=&#39;&lt;&amp;&gt;"));
    assert!(!body.contains("'<&>"));
}

#[tokio::test]
async fn meta_redirect_kind_serves_refresh_html() {
    let (state, app) = setup().await;
    state
        .db
        .create_campaign(&campaign("promo-8", RedirectKind::Meta))
        .await
        .expect("seed");

    let response = app
        .oneshot(get_request("promo-8", "203.0.113.5", CHROME_UA))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("http-equiv=\"refresh\""));
    assert!(body.contains("https://m.example/a"));
}

#[tokio::test]
async fn zero_weight_streams_fall_back_to_campaign_urls() {
    let (state, app) = setup().await;
    state
        .db
        .create_campaign(&campaign("promo-9", RedirectKind::Http302))
        .await
        .expect("seed");
    state
        .db
        .create_stream(&Stream {
            id: "st-zero".to_string(),
            campaign_id: "camp-promo-9".to_string(),
            name: "disabled by weight".to_string(),
            weight: 0,
            active: true,
            money_url: Some("https://m.example/should-not-be-used".to_string()),
            safe_url: None,
            rules: Vec::new(),
        })
        .await
        .expect("stream");

    let response = app
        .oneshot(get_request("promo-9", "203.0.113.5", CHROME_UA))
        .await
        .expect("response");
    assert_eq!(location(&response), "https://m.example/a");
}

#[tokio::test]
async fn matching_stream_overrides_the_money_url() {
    let (state, app) = setup().await;
    state
        .db
        .create_campaign(&campaign("promo-10", RedirectKind::Http302))
        .await
        .expect("seed");
    state
        .db
        .create_stream(&Stream {
            id: "st-news".to_string(),
            campaign_id: "camp-promo-10".to_string(),
            name: "news referrals".to_string(),
            weight: 10,
            active: true,
            money_url: Some("https://m.example/news-offer".to_string()),
            safe_url: None,
            rules: vec![TargetingRule {
                id: "r-news".to_string(),
                stream_id: "st-news".to_string(),
                rule_type: RuleType::Referer,
                operator: RuleOperator::Contains,
                value: RuleValue::One("news.example".to_string()),
                include: true,
            }],
        })
        .await
        .expect("stream");

    let mut request = get_request("promo-10", "203.0.113.5", CHROME_UA);
    request.headers_mut().insert(
        header::REFERER,
        "https://news.example/article".parse().expect("referer"),
    );
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(location(&response), "https://m.example/news-offer");

    // Without the referrer the include-rule fails and the base URL is used.
    let response = app
        .oneshot(get_request("promo-10", "203.0.113.99", CHROME_UA))
        .await
        .expect("response");
    assert_eq!(location(&response), "https://m.example/a");
}

#[tokio::test]
async fn blacklisted_ip_is_blocked_after_refresh() {
    let (state, app) = setup().await;
    state
        .db
        .create_campaign(&campaign("promo-11", RedirectKind::Http302))
        .await
        .expect("seed");
    let now = chrono::Utc::now();
    state
        .db
        .upsert_blacklist_entry(&BlacklistEntry {
            id: "bl-1".to_string(),
            ip: "203.0.113.66".to_string(),
            reason: "manual block".to_string(),
            detection_kind: DetectionKind::Manual,
            confidence: 1.0,
            first_detected_at: now,
            last_detected_at: now,
            expires_at: None,
        })
        .await
        .expect("blacklist");
    state.blacklist.refresh().await.expect("refresh");

    let response = app
        .oneshot(get_request("promo-11", "203.0.113.66", CHROME_UA))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/404");
}

#[tokio::test]
async fn decided_requests_reach_the_traffic_log() {
    let (state, app) = setup().await;
    state
        .db
        .create_campaign(&campaign("promo-12", RedirectKind::Http302))
        .await
        .expect("seed");

    let response = app
        .oneshot(get_request("promo-12", "203.0.113.5", CHROME_UA))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FOUND);

    // The sink is fire-and-forget; poll briefly for the worker to drain.
    let mut traffic = 0i64;
    let mut metrics = 0i64;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let conn = state.db.conn_for_test().await;
        traffic = conn
            .prepare("SELECT COUNT(*) FROM traffic_records WHERE campaign_id = 'camp-promo-12'")
            .expect("prepare")
            .query_row([], |row| row.get(0))
            .expect("count");
        metrics = conn
            .prepare("SELECT COUNT(*) FROM metric_points WHERE campaign_id = 'camp-promo-12'")
            .expect("prepare")
            .query_row([], |row| row.get(0))
            .expect("count");
        if traffic > 0 && metrics > 0 {
            break;
        }
    }
    assert_eq!(traffic, 1, "expected one traffic record");
    assert_eq!(metrics, 1, "expected one metric point");
    assert_eq!(state.sink.dropped_count(), 0);
}

#[tokio::test]
async fn decision_path_status_codes_stay_in_the_allowed_set() {
    let (state, app) = setup().await;
    state
        .db
        .create_campaign(&campaign("promo-13", RedirectKind::Http301))
        .await
        .expect("seed");

    let requests = vec![
        get_request("promo-13", "203.0.113.5", CHROME_UA),
        get_request("promo-13", "10.0.0.5", CHROME_UA),
        get_request("promo-13", "203.0.113.5", HEADLESS_UA),
        get_request("missing", "203.0.113.5", CHROME_UA),
        Request::builder()
            .method("OPTIONS")
            .uri("/promo-13")
            .body(Body::empty())
            .expect("request"),
        // Malformed fingerprint body must not surface as an error.
        Request::builder()
            .method("POST")
            .uri("/promo-13")
            .header("x-forwarded-for", "203.0.113.5")
            .header(header::USER_AGENT, CHROME_UA)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .expect("request"),
    ];
    for request in requests {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status().as_u16();
        assert!(
            matches!(status, 200 | 204 | 301 | 302),
            "unexpected status {status}"
        );
    }
}
