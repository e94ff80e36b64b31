use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use cloakgate_core::campaign::RedirectKind;
use cloakgate_core::decision::Decision;

/// HTML-attribute-safe escape for URLs embedded in the js/meta bodies.
fn escape_attr(url: &str) -> String {
    let mut escaped = String::with_capacity(url.len());
    for c in url.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '\'' => escaped.push_str("&#39;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Translate a [`Decision`] into the HTTP response for its redirect kind.
///
/// Every response carries `Cache-Control: no-store` — intermediaries must
/// never replay one visitor's routing to another.
pub fn respond(decision: &Decision) -> Response {
    let mut response = match decision.redirect_kind {
        RedirectKind::Http301 => {
            redirect_response(StatusCode::MOVED_PERMANENTLY, &decision.redirect_url)
        }
        RedirectKind::Http302 | RedirectKind::Direct => {
            redirect_response(StatusCode::FOUND, &decision.redirect_url)
        }
        RedirectKind::Js => html_response(format!(
            "<script>window.location.href='{}'</script>",
            escape_attr(&decision.redirect_url)
        )),
        RedirectKind::Meta => html_response(format!(
            "<html><head><meta http-equiv=\"refresh\" content=\"0;url={}\"></head></html>",
            escape_attr(&decision.redirect_url)
        )),
    };
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    response
}

fn redirect_response(status: StatusCode, url: &str) -> Response {
    let location = HeaderValue::from_str(url)
        .unwrap_or_else(|_| HeaderValue::from_static("/"));
    ([(header::LOCATION, location)], status).into_response()
}

fn html_response(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/html"))],
        body,
    )
        .into_response()
}
