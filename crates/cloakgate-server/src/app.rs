use std::sync::Arc;

use axum::{
    routing::{any, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// Construct the router.
///
/// Middleware is applied in outer-to-inner order (outermost runs first on
/// request, last on response):
///
/// 1. `TraceLayer` — structured request/response logging via `tracing`.
/// 2. `CorsLayer` — permissive CORS; the fingerprint collector posts from
///    third-party pages, so browsers need these headers on every response.
///    Browser preflights (OPTIONS with `Access-Control-Request-Method`) are
///    answered by the layer; a bare OPTIONS probe falls through to the
///    decision endpoint's own 204.
///
/// `/health` and `/detect` are literal routes, so they shadow campaign slugs
/// of the same name — both are reserved words for slug choice.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/detect", post(routes::detect::detect))
        .route("/{slug}", any(routes::decide::decide))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
