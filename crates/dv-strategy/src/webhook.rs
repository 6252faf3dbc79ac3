//! Read-only strategy fetching extraction results from the n8n webhook.

use crate::REQUEST_ID_MISSING;
use crate::StrategyKind;
use crate::base::StrategyBase;
use crate::base::elapsed_millis;
use crate::context::ContextUpdate;
use crate::context::ValidationContext;
use crate::events::EventKind;
use crate::events::EventLog;
use crate::result::SaveOutcome;
use crate::result::ValidationMetadata;
use crate::result::ValidationReport;
use crate::result::ValidationResult;
use dv_core::Clock;
use dv_core::DocuError;
use dv_core::DocuResult;
use reqwest::Client;
use reqwest::Url;
use reqwest::header::ACCEPT;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::time::timeout;
use tracing::info;
use tracing::warn;

/// Endpoint used unless the caller opts into an override.
pub const DEFAULT_WEBHOOK_URL: &str = "https://n8n.localhost/webhook/validation-data";
/// Bounds the whole exchange, response body included.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct WebhookStrategy {
    base: StrategyBase,
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl WebhookStrategy {
    pub fn new(client: Client, context: ValidationContext, clock: Arc<dyn Clock>) -> Self {
        Self {
            base: StrategyBase::new(StrategyKind::Webhook, context, clock),
            client,
            endpoint: DEFAULT_WEBHOOK_URL.to_owned(),
            timeout: WEBHOOK_TIMEOUT,
        }
    }

    /// Replaces the fixed endpoint. Only absolute http(s) URLs are accepted.
    pub fn with_endpoint(mut self, endpoint: &str) -> DocuResult<Self> {
        let url = Url::parse(endpoint).map_err(|error| {
            DocuError::new(
                "strategy.webhook_endpoint_invalid",
                format!("webhook endpoint `{endpoint}` is not a valid URL: {error}"),
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DocuError::new(
                "strategy.webhook_endpoint_invalid",
                format!("webhook endpoint `{endpoint}` must use http or https"),
            ));
        }

        self.endpoint = url.into();
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn context(&self) -> &ValidationContext {
        self.base.context()
    }

    pub fn events(&self) -> &EventLog {
        self.base.events()
    }

    pub fn update_context(&mut self, update: ContextUpdate) {
        self.base.update_context(update);
    }

    pub async fn can_use(&self) -> bool {
        self.base.request_id().is_some()
    }

    pub async fn load(&self) -> ValidationResult {
        let started = Instant::now();
        let Some(request_id) = self.base.request_id().cloned() else {
            return self.fail(REQUEST_ID_MISSING.to_owned(), Some(self.base.metadata()));
        };
        let session_id = request_id.session_segment().to_owned();
        self.base.emit(
            EventKind::Load,
            json!({
                "request_id": request_id.as_str(),
                "session_id": session_id,
                "endpoint": self.endpoint,
            }),
        );

        let cache_bust = self.base.now_millis().to_string();
        let request = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("session_id", session_id.as_str()),
                ("req_id", request_id.as_str()),
                ("request_id", request_id.as_str()),
                ("_cb", cache_bust.as_str()),
            ])
            .header(ACCEPT, "application/json");

        let fetched = timeout(self.timeout, async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        })
        .await;

        let duration_ms = elapsed_millis(started);
        let metadata = self
            .base
            .metadata()
            .with_duration_ms(duration_ms)
            .with_extra("session_id", session_id.clone());

        let (status, body) = match fetched {
            Err(_) => {
                return self.fail(
                    format!("timeout after {}ms", self.timeout.as_millis()),
                    Some(metadata),
                );
            }
            Ok(Err(error)) => {
                return self.fail(format!("network/CORS failure: {error}"), Some(metadata));
            }
            Ok(Ok(parts)) => parts,
        };

        let metadata = metadata.with_status(status);
        match interpret_response(status, &body) {
            Ok(data) => {
                info!(
                    request_id = %request_id,
                    status,
                    duration_ms,
                    fields = data.len(),
                    "webhook data loaded"
                );
                self.base.emit(
                    EventKind::Load,
                    json!({ "status": status, "field_count": data.len() }),
                );
                let metadata = metadata.with_extra("field_count", data.len());
                ValidationResult::success(data, metadata)
            }
            Err(message) => self.fail(message, Some(metadata)),
        }
    }

    /// The webhook is a read-only source.
    pub async fn save(&self, _data: &Map<String, Value>) -> SaveOutcome {
        self.base
            .emit(EventKind::Save, json!({ "supported": false }));
        SaveOutcome::not_supported()
    }

    pub async fn validate(&self, data: &Value) -> ValidationReport {
        let mut errors = Vec::new();
        match data {
            Value::Object(map) if !map.is_empty() => {}
            _ => errors.push("payload must be a non-empty object".to_owned()),
        }

        self.base.emit(
            EventKind::Validate,
            json!({ "valid": errors.is_empty(), "errors": errors }),
        );
        ValidationReport::from_errors(errors)
    }

    fn fail(&self, message: String, metadata: Option<ValidationMetadata>) -> ValidationResult {
        warn!(strategy = "webhook", error = %message, "load failed");
        self.base.emit_error("load", &message);
        ValidationResult::failure(message, metadata)
    }
}

/// Maps a raw webhook exchange to data or a user-facing error.
pub fn interpret_response(status: u16, body: &str) -> Result<Map<String, Value>, String> {
    if status >= 400 {
        return Err(match status {
            404 => "n8n endpoint not found (404)".to_owned(),
            500 => "n8n server error (500)".to_owned(),
            other => format!("HTTP {other}"),
        });
    }

    if body.trim().is_empty() {
        return Err("empty response from webhook".to_owned());
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|_| "malformed JSON in webhook response".to_owned())?;

    match value {
        Value::Object(map) => Ok(map),
        Value::Array(items) => items
            .into_iter()
            .find_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .ok_or_else(|| "invalid response format".to_owned()),
        _ => Err("invalid response format".to_owned()),
    }
}
