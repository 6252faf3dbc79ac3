//! Origin allow-list enforcement and CORS response headers.

use crate::GatewayState;
use crate::error::GatewayError;
use axum::extract::Request;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use tracing::debug;
use tracing::warn;

const ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const ALLOW_HEADERS: &str = "content-type, x-request-id, authorization";
const PREFLIGHT_MAX_AGE: &str = "3600";

/// Rejects browser requests from unknown origins. Requests without an
/// `Origin` header (curl, server-to-server) pass through untouched.
pub async fn enforce_origin(
    State(state): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(origin) = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
    else {
        return next.run(request).await;
    };

    if !state.origins.is_allowed(&origin) {
        warn!(%origin, path = %request.uri().path(), "origin rejected");
        return GatewayError::OriginNotAllowed.into_response();
    }

    let mut response = if request.method() == Method::OPTIONS {
        debug!(%origin, path = %request.uri().path(), "preflight");
        preflight()
    } else {
        next.run(request).await
    };
    apply_cors_headers(response.headers_mut(), &origin);
    response
}

fn preflight() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE),
    );
    response
}

fn apply_cors_headers(headers: &mut HeaderMap, origin: &str) {
    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
}
