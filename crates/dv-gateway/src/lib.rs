//! HTTP gateway in front of the validation webhook.
//!
//! Browsers cannot call the workflow engine directly, so the UI posts to
//! `/api/validation-created` here. The gateway checks the caller's `Origin`
//! against an allow-list, forwards the body with a small set of headers, and
//! mirrors whatever status and body the webhook answers with.

pub mod config;
pub mod error;
pub mod origin;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderName;
use axum::http::StatusCode;
use axum::http::header;
use axum::middleware;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use dv_security::OriginPolicy;
use reqwest::Client;
use serde_json::Value;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tower_http::trace::TraceLayer;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub use config::GatewayConfig;
pub use error::GatewayError;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Headers copied from the browser request onto the forwarded one.
const FORWARDED_HEADERS: [HeaderName; 3] =
    [header::CONTENT_TYPE, X_REQUEST_ID, header::USER_AGENT];

#[derive(Clone)]
pub struct GatewayState {
    client: Client,
    target: Arc<str>,
    origins: Arc<OriginPolicy>,
}

impl GatewayState {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.forward_timeout)
            .build()
            .map_err(|error| GatewayError::Config(format!("HTTP client: {error}")))?;
        Ok(Self {
            client,
            target: Arc::from(config.webhook_url.as_str()),
            origins: Arc::new(config.allowed_origins.clone()),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/validation-created", post(validation_created))
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            origin::enforce_origin,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn validation_created(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let mut request = state.client.post(&*state.target).body(body);
    for name in FORWARDED_HEADERS {
        if let Some(value) = headers.get(&name) {
            request = request.header(name, value.clone());
        }
    }

    let upstream = request.send().await.map_err(|error| {
        warn!(target_url = %state.target, %error, "webhook unreachable");
        GatewayError::proxy("failed to reach validation webhook", error)
    })?;

    let status = upstream.status();
    let content_type = upstream.headers().get(header::CONTENT_TYPE).cloned();
    let body = upstream.bytes().await.map_err(|error| {
        warn!(target_url = %state.target, %error, "webhook response interrupted");
        GatewayError::proxy("failed to read validation webhook response", error)
    })?;
    debug!(%status, bytes = body.len(), "webhook answered");

    let mut response = (status, body).into_response();
    if let Some(content_type) = content_type {
        response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

/// Binds `config.bind` and serves until Ctrl+C or SIGTERM.
pub async fn serve(config: GatewayConfig) -> Result<(), GatewayError> {
    let state = GatewayState::new(&config)?;

    info!("Binding to {}", config.bind);
    let listener = TcpListener::bind(config.bind).await?;
    info!(
        target_url = %state.target(),
        origins = config.allowed_origins.origins().count(),
        "Gateway running on {}",
        config.bind
    );

    serve_on(listener, state, shutdown_signal()).await?;
    info!("Gateway shut down");
    Ok(())
}

pub async fn serve_on(
    listener: TcpListener,
    state: GatewayState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), GatewayError> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = ctrl_c().await {
            warn!(%error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::SignalKind;
        use tokio::signal::unix::signal;

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::GatewayConfig;
    use super::GatewayState;
    use super::router;
    use axum::Json;
    use axum::Router;
    use axum::http::HeaderMap;
    use axum::http::StatusCode;
    use axum::routing::post;
    use dv_security::OriginPolicy;
    use serde_json::Value;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpListener;

    const ALLOWED: &str = "http://localhost:5173";

    async fn spawn(app: Router) -> SocketAddr {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(error) => panic!("{error}"),
        };
        let address = match listener.local_addr() {
            Ok(address) => address,
            Err(error) => panic!("{error}"),
        };
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        address
    }

    async fn echo(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(ToOwned::to_owned)
        };
        (
            StatusCode::CREATED,
            Json(json!({
                "request_id": header("x-request-id"),
                "user_agent": header("user-agent"),
                "content_type": header("content-type"),
                "cookie": header("cookie"),
                "body": body,
            })),
        )
    }

    async fn gateway(target: String) -> SocketAddr {
        let config = GatewayConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            allowed_origins: OriginPolicy::default(),
            webhook_url: target,
            forward_timeout: Duration::from_secs(5),
        };
        let state = match GatewayState::new(&config) {
            Ok(state) => state,
            Err(error) => panic!("{error}"),
        };
        spawn(router(state)).await
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let address = gateway("http://127.0.0.1:9/unused".to_owned()).await;
        let response = reqwest::get(format!("http://{address}/healthz")).await;
        let Ok(response) = response else {
            panic!("gateway unreachable");
        };
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.json::<Value>().await.ok(), Some(json!({"status": "ok"})));
    }

    #[tokio::test]
    async fn forwards_body_and_selected_headers() {
        let upstream = spawn(Router::new().route("/hook", post(echo))).await;
        let address = gateway(format!("http://{upstream}/hook")).await;

        let response = reqwest::Client::new()
            .post(format!("http://{address}/api/validation-created"))
            .header("origin", ALLOWED)
            .header("x-request-id", "req_1_abcdef")
            .header("user-agent", "docuvalid-ui/1.0")
            .header("cookie", "session=secret")
            .json(&json!({"requestId": "req_1_abcdef"}))
            .send()
            .await;
        let Ok(response) = response else {
            panic!("gateway unreachable");
        };

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .and_then(|value| value.to_str().ok()),
            Some(ALLOWED)
        );
        assert_eq!(
            response
                .headers()
                .get("vary")
                .and_then(|value| value.to_str().ok()),
            Some("Origin")
        );

        let echoed = match response.json::<Value>().await {
            Ok(echoed) => echoed,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(echoed["request_id"], "req_1_abcdef");
        assert_eq!(echoed["user_agent"], "docuvalid-ui/1.0");
        assert_eq!(echoed["content_type"], "application/json");
        assert_eq!(echoed["cookie"], Value::Null);
        assert_eq!(echoed["body"], json!({"requestId": "req_1_abcdef"}));
    }

    #[tokio::test]
    async fn upstream_errors_are_mirrored() {
        let upstream = spawn(Router::new().route(
            "/hook",
            post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "bad payload") }),
        ))
        .await;
        let address = gateway(format!("http://{upstream}/hook")).await;

        let response = reqwest::Client::new()
            .post(format!("http://{address}/api/validation-created"))
            .body("{}")
            .send()
            .await;
        let Ok(response) = response else {
            panic!("gateway unreachable");
        };
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.text().await.ok().as_deref(), Some("bad payload"));
    }

    #[tokio::test]
    async fn unreachable_webhook_is_bad_gateway() {
        let closed = match TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener.local_addr(),
            Err(error) => panic!("{error}"),
        };
        let Ok(closed) = closed else {
            panic!("no local address");
        };
        let address = gateway(format!("http://{closed}/hook")).await;

        let response = reqwest::Client::new()
            .post(format!("http://{address}/api/validation-created"))
            .json(&json!({}))
            .send()
            .await;
        let Ok(response) = response else {
            panic!("gateway unreachable");
        };
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = match response.json::<Value>().await {
            Ok(body) => body,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(body["error"], "proxy_error");
        assert_eq!(body["message"], "failed to reach validation webhook");
        assert!(body["details"].as_str().is_some_and(|details| !details.is_empty()));
    }

    #[tokio::test]
    async fn unknown_origin_is_forbidden() {
        let address = gateway("http://127.0.0.1:9/unused".to_owned()).await;
        let client = reqwest::Client::new();

        for method in [reqwest::Method::POST, reqwest::Method::OPTIONS] {
            let response = client
                .request(method, format!("http://{address}/api/validation-created"))
                .header("origin", "https://evil.example")
                .send()
                .await;
            let Ok(response) = response else {
                panic!("gateway unreachable");
            };
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
            assert_eq!(
                response.json::<Value>().await.ok(),
                Some(json!({"error": "origin not allowed"}))
            );
        }
    }

    #[tokio::test]
    async fn allowed_preflight_is_no_content() {
        let address = gateway("http://127.0.0.1:9/unused".to_owned()).await;
        let response = reqwest::Client::new()
            .request(
                reqwest::Method::OPTIONS,
                format!("http://{address}/api/validation-created"),
            )
            .header("origin", ALLOWED)
            .header("access-control-request-method", "POST")
            .send()
            .await;
        let Ok(response) = response else {
            panic!("gateway unreachable");
        };

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(
            headers
                .get("access-control-allow-origin")
                .and_then(|value| value.to_str().ok()),
            Some(ALLOWED)
        );
        assert!(
            headers
                .get("access-control-allow-methods")
                .and_then(|value| value.to_str().ok())
                .is_some_and(|methods| methods.contains("POST"))
        );
    }
}
