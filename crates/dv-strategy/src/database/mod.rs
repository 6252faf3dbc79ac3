//! Strategy backed by a hosted PostgREST-style table.

pub mod review;

use crate::REQUEST_ID_MISSING;
use crate::StrategyKind;
use crate::base::StrategyBase;
use crate::base::elapsed_millis;
use crate::context::ContextUpdate;
use crate::context::ValidationContext;
use crate::events::EventKind;
use crate::events::EventLog;
use crate::result::SaveOutcome;
use crate::result::ValidationReport;
use crate::result::ValidationResult;
use chrono::DateTime;
use chrono::SecondsFormat;
use dv_core::Clock;
use dv_core::DocuError;
use dv_core::DocuResult;
use dv_identity::PageLocation;
use dv_security::AuthService;
use reqwest::Client;
use reqwest::Method;
use reqwest::RequestBuilder;
use reqwest::Url;
use reqwest::header::ACCEPT;
use reqwest::header::AUTHORIZATION;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::time::timeout;
use tracing::info;
use tracing::warn;

pub use review::ColumnKind;
pub use review::RecordStatus;
pub use review::ReviewField;
pub use review::ReviewSheet;
pub use review::render_cell;

pub const DEFAULT_TABLE: &str = "validations";
pub const DATABASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the hosted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    base_url: Url,
    anon_key: String,
    table: String,
}

impl DatabaseConfig {
    pub fn new(base_url: &str, anon_key: impl Into<String>) -> DocuResult<Self> {
        let base_url = Url::parse(base_url).map_err(|error| {
            DocuError::new(
                "database.config_invalid",
                format!("database URL `{base_url}` is not valid: {error}"),
            )
        })?;
        let anon_key = anon_key.into();
        if anon_key.trim().is_empty() {
            return Err(DocuError::new(
                "database.config_invalid",
                "database anon key must not be empty",
            ));
        }

        Ok(Self {
            base_url,
            anon_key,
            table: DEFAULT_TABLE.to_owned(),
        })
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.base_url.as_str().trim_end_matches('/'),
            self.table
        )
    }
}

/// Record id taken from the page's `id` query parameter.
pub fn record_id_from_location(location: &PageLocation) -> Option<String> {
    location
        .query_param("id")
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[derive(Clone)]
pub struct DatabaseStrategy {
    base: StrategyBase,
    client: Client,
    config: DatabaseConfig,
    auth: Option<Arc<AuthService>>,
    record_id: Option<String>,
    timeout: Duration,
}

impl DatabaseStrategy {
    pub fn new(
        client: Client,
        config: DatabaseConfig,
        context: ValidationContext,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            base: StrategyBase::new(StrategyKind::Database, context, clock),
            client,
            config,
            auth: None,
            record_id: None,
            timeout: DATABASE_TIMEOUT,
        }
    }

    pub fn with_auth(mut self, auth: Arc<AuthService>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Explicit record id; takes precedence over the request id.
    pub fn with_record_id(mut self, record_id: Option<String>) -> Self {
        self.record_id = record_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
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

    pub fn record_id(&self) -> Option<String> {
        self.record_id
            .clone()
            .or_else(|| self.base.request_id().map(ToString::to_string))
    }

    pub async fn can_use(&self) -> bool {
        self.record_id().is_some()
    }

    pub async fn load(&self) -> ValidationResult {
        let started = Instant::now();
        let Some(record_id) = self.record_id() else {
            return self.fail("load", REQUEST_ID_MISSING.to_owned(), None, started);
        };
        self.base.emit(
            EventKind::Load,
            json!({ "record_id": record_id, "table": self.config.table }),
        );

        let request = self
            .request(Method::GET, &record_id)
            .query(&[("select", "*")]);
        let (status, body) = match self.exchange(request).await {
            Ok(parts) => parts,
            Err(message) => return self.fail("load", message, None, started),
        };

        match single_row(status, &body) {
            Ok(row) => {
                info!(record_id = %record_id, table = %self.config.table, "database record loaded");
                let metadata = self
                    .base
                    .metadata()
                    .with_status(status)
                    .with_duration_ms(elapsed_millis(started))
                    .with_extra("record_id", record_id)
                    .with_extra("table", self.config.table.clone())
                    .with_extra("field_count", row.len());
                ValidationResult::success(row, metadata)
            }
            Err(message) => self.fail("load", message, Some(status), started),
        }
    }

    /// Patches the identified row with `data` plus `updated_at`.
    pub async fn save(&self, data: &Map<String, Value>) -> SaveOutcome {
        let Some(record_id) = self.record_id() else {
            self.base.emit_error("save", REQUEST_ID_MISSING);
            return SaveOutcome::failed(REQUEST_ID_MISSING);
        };

        let mut body = data.clone();
        body.insert(
            "updated_at".to_owned(),
            Value::String(iso_timestamp(self.base.now_millis())),
        );

        match self.patch(&record_id, body).await {
            Ok(()) => {
                self.base.emit(
                    EventKind::Save,
                    json!({ "record_id": record_id, "fields": data.len() }),
                );
                SaveOutcome::saved(record_id)
            }
            Err(message) => {
                warn!(record_id = %record_id, error = %message, "database save failed");
                self.base.emit_error("save", &message);
                SaveOutcome::failed(message)
            }
        }
    }

    pub async fn validate(&self, data: &Value) -> ValidationReport {
        let mut errors = Vec::new();
        match data {
            Value::Object(map) if map.is_empty() => {
                errors.push("payload must be a non-empty object".to_owned());
            }
            Value::Object(map) => {
                let sheet = ReviewSheet::from_record(map);
                if sheet.columns().next().is_none() {
                    errors.push("record has no reviewable columns".to_owned());
                }
            }
            _ => errors.push("payload must be a non-empty object".to_owned()),
        }

        self.base.emit(
            EventKind::Validate,
            json!({ "valid": errors.is_empty(), "errors": errors }),
        );
        ValidationReport::from_errors(errors)
    }

    /// Moves the record one step along its lifecycle with a single PATCH.
    pub async fn transition(
        &self,
        current: RecordStatus,
        target: RecordStatus,
        sheet: &ReviewSheet,
    ) -> DocuResult<RecordStatus> {
        current.check_transition(target, sheet)?;
        let record_id = self
            .record_id()
            .ok_or_else(|| DocuError::new("database.record_id_missing", REQUEST_ID_MISSING))?;

        let now = iso_timestamp(self.base.now_millis());
        let mut body = Map::new();
        body.insert("status".to_owned(), json!(target.as_str()));
        body.insert("updated_at".to_owned(), json!(now));
        if let Some(column) = target.timestamp_column() {
            body.insert(column.to_owned(), json!(now));
        }

        self.patch(&record_id, body).await.map_err(|message| {
            self.base.emit_error("save", &message);
            DocuError::new("database.update_failed", message)
        })?;

        info!(
            record_id = %record_id,
            from = current.as_str(),
            to = target.as_str(),
            "record status changed"
        );
        self.base.emit(
            EventKind::Save,
            json!({ "record_id": record_id, "status": target.as_str() }),
        );
        Ok(target)
    }

    async fn patch(&self, record_id: &str, body: Map<String, Value>) -> Result<(), String> {
        let request = self
            .request(Method::PATCH, record_id)
            .header("Prefer", "return=representation")
            .json(&body);
        let (status, raw) = self.exchange(request).await?;
        single_row(status, &raw).map(|_| ())
    }

    fn request(&self, method: Method, record_id: &str) -> RequestBuilder {
        let bearer = self
            .auth
            .as_ref()
            .and_then(|auth| auth.bearer_token())
            .unwrap_or_else(|| self.config.anon_key.clone());

        self.client
            .request(method, self.config.table_url())
            .query(&[("id", format!("eq.{record_id}"))])
            .header("apikey", &self.config.anon_key)
            .header(AUTHORIZATION, format!("Bearer {bearer}"))
            .header(ACCEPT, "application/json")
    }

    async fn exchange(&self, request: RequestBuilder) -> Result<(u16, String), String> {
        let fetched = timeout(self.timeout, async {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        })
        .await;

        match fetched {
            Err(_) => Err(format!(
                "[proxy] timeout after {}ms",
                self.timeout.as_millis()
            )),
            Ok(Err(error)) => Err(format!("[proxy] {error}")),
            Ok(Ok(parts)) => Ok(parts),
        }
    }

    fn fail(
        &self,
        operation: &str,
        message: String,
        status: Option<u16>,
        started: Instant,
    ) -> ValidationResult {
        warn!(strategy = "database", error = %message, "{operation} failed");
        self.base.emit_error(operation, &message);
        let mut metadata = self
            .base
            .metadata()
            .with_duration_ms(elapsed_millis(started))
            .with_extra("table", self.config.table.clone());
        if let Some(status) = status {
            metadata = metadata.with_status(status);
        }
        ValidationResult::failure(message, Some(metadata))
    }
}

/// Interprets a PostgREST response expected to hold exactly one row.
fn single_row(status: u16, body: &str) -> Result<Map<String, Value>, String> {
    if status >= 400 {
        return Err(format!("[db] {}", backend_message(status, body)));
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|_| "[db] malformed JSON response".to_owned())?;
    match value {
        Value::Array(rows) => match rows.into_iter().next() {
            None => Err("record not found".to_owned()),
            Some(Value::Object(row)) => Ok(row),
            Some(_) => Err("[db] invalid response format".to_owned()),
        },
        Value::Object(row) => Ok(row),
        _ => Err("[db] invalid response format".to_owned()),
    }
}

fn backend_message(status: u16, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    if let Some(message) = parsed
        .as_ref()
        .and_then(|value| value.get("message"))
        .and_then(Value::as_str)
    {
        return message.to_owned();
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        trimmed.to_owned()
    }
}

fn iso_timestamp(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .map(|time| time.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::DatabaseConfig;
    use super::DatabaseStrategy;
    use super::RecordStatus;
    use super::ReviewSheet;
    use super::iso_timestamp;
    use super::record_id_from_location;
    use super::single_row;
    use crate::context::ValidationContext;
    use axum::Json;
    use axum::Router;
    use axum::extract::Query;
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::http::StatusCode;
    use axum::routing::get;
    use dv_core::FixedClock;
    use dv_core::RequestId;
    use dv_identity::PageLocation;
    use dv_security::AuthService;
    use dv_security::AuthSession;
    use serde_json::Map;
    use serde_json::Value;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;

    const NOW: u64 = 1_709_287_200_000;

    #[derive(Clone, Default)]
    struct Backend {
        patches: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
    }

    impl Backend {
        fn patches(&self) -> Vec<(String, Option<String>, Value)> {
            match self.patches.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }
    }

    async fn select(
        Query(params): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> (StatusCode, Json<Value>) {
        if headers.get("apikey").and_then(|value| value.to_str().ok()) != Some("anon-key") {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"message": "Invalid API key"})),
            );
        }
        match params.get("id").map(String::as_str) {
            Some("eq.rec-1") => (
                StatusCode::OK,
                Json(json!([{"id": "rec-1", "status": "draft", "nom": "Doe", "payload": {"a": 1}}])),
            ),
            Some("eq.broken") => (
                StatusCode::BAD_REQUEST,
                Json(json!({"message": "column validations.x does not exist"})),
            ),
            _ => (StatusCode::OK, Json(json!([]))),
        }
    }

    async fn update(
        State(backend): State<Backend>,
        Query(params): Query<HashMap<String, String>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let id = params.get("id").cloned().unwrap_or_default();
        let authorization = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned);
        if let Ok(mut guard) = backend.patches.lock() {
            guard.push((id.clone(), authorization, body));
        }
        if id == "eq.rec-1" {
            (StatusCode::OK, Json(json!([{"id": "rec-1"}])))
        } else {
            (StatusCode::OK, Json(json!([])))
        }
    }

    async fn spawn(backend: Backend) -> String {
        let router = Router::new()
            .route("/rest/v1/validations", get(select).patch(update))
            .with_state(backend);
        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(error) => panic!("{error}"),
        };
        let address = match listener.local_addr() {
            Ok(address) => address,
            Err(error) => panic!("{error}"),
        };
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{address}")
    }

    fn strategy(base_url: &str, record_id: Option<&str>, request_id: Option<&str>) -> DatabaseStrategy {
        let config = match DatabaseConfig::new(base_url, "anon-key") {
            Ok(config) => config,
            Err(error) => panic!("{error}"),
        };
        let request_id = request_id.map(|raw| match RequestId::parse(raw) {
            Ok(id) => id,
            Err(error) => panic!("{error}"),
        });
        DatabaseStrategy::new(
            reqwest::Client::new(),
            config,
            ValidationContext::new(request_id),
            Arc::new(FixedClock::new(NOW)),
        )
        .with_record_id(record_id.map(ToOwned::to_owned))
    }

    fn acknowledged_sheet() -> ReviewSheet {
        let mut record = Map::new();
        record.insert("nom".to_owned(), json!("Doe"));
        let mut sheet = ReviewSheet::from_record(&record);
        assert!(sheet.acknowledge("nom").is_ok());
        sheet
    }

    #[test]
    fn single_row_mapping() {
        assert_eq!(single_row(200, "[]"), Err("record not found".to_owned()));
        assert_eq!(
            single_row(401, r#"{"message":"JWT expired"}"#),
            Err("[db] JWT expired".to_owned())
        );
        assert_eq!(single_row(502, ""), Err("[db] HTTP 502".to_owned()));
        assert_eq!(
            single_row(200, "[3]"),
            Err("[db] invalid response format".to_owned())
        );
        assert!(single_row(200, r#"[{"id": 1}]"#).is_ok());
    }

    #[test]
    fn record_id_prefers_location_parameter() {
        let page = match PageLocation::parse("https://app.test/review?id=rec-9&rid=req_12345") {
            Ok(page) => page,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(record_id_from_location(&page).as_deref(), Some("rec-9"));

        let explicit = strategy("http://127.0.0.1:9", Some("rec-9"), Some("req_12345"));
        assert_eq!(explicit.record_id().as_deref(), Some("rec-9"));
        let fallback = strategy("http://127.0.0.1:9", None, Some("req_12345"));
        assert_eq!(fallback.record_id().as_deref(), Some("req_12345"));
    }

    #[test]
    fn timestamps_are_rfc3339_utc() {
        assert_eq!(iso_timestamp(NOW), "2024-03-01T10:00:00.000Z");
    }

    #[tokio::test]
    async fn loads_single_row_by_primary_key() {
        let base = spawn(Backend::default()).await;
        let result = strategy(&base, Some("rec-1"), None).load().await;
        assert!(result.is_success(), "{:?}", result.error());
        assert_eq!(
            result.data().and_then(|data| data.get("nom")),
            Some(&json!("Doe"))
        );
        assert_eq!(result.metadata().and_then(|metadata| metadata.status()), Some(200));
    }

    #[tokio::test]
    async fn missing_row_and_backend_errors_are_annotated() {
        let base = spawn(Backend::default()).await;
        let missing = strategy(&base, Some("rec-404"), None).load().await;
        assert_eq!(missing.error(), Some("record not found"));

        let broken = strategy(&base, Some("broken"), None).load().await;
        assert_eq!(broken.error(), Some("[db] column validations.x does not exist"));

        let unreachable = strategy("http://127.0.0.1:9", Some("rec-1"), None).load().await;
        assert!(
            unreachable
                .error()
                .is_some_and(|error| error.starts_with("[proxy] "))
        );
    }

    #[tokio::test]
    async fn save_patches_row_with_updated_at() {
        let backend = Backend::default();
        let base = spawn(backend.clone()).await;
        let mut data = Map::new();
        data.insert("nom".to_owned(), json!("Smith"));

        let outcome = strategy(&base, Some("rec-1"), None).save(&data).await;
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.id.as_deref(), Some("rec-1"));

        let patches = backend.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].0, "eq.rec-1");
        assert_eq!(patches[0].1.as_deref(), Some("Bearer anon-key"));
        assert_eq!(
            patches[0].2,
            json!({"nom": "Smith", "updated_at": "2024-03-01T10:00:00.000Z"})
        );
    }

    #[tokio::test]
    async fn transition_sends_one_patch_with_status_columns() {
        let backend = Backend::default();
        let base = spawn(backend.clone()).await;
        let auth = Arc::new(AuthService::new(Arc::new(FixedClock::new(NOW))));
        assert!(auth
            .sign_in(AuthSession {
                user_id: "reviewer".to_owned(),
                access_token: "user-jwt".to_owned(),
                expires_at: None,
            })
            .is_ok());
        let strategy = strategy(&base, Some("rec-1"), None).with_auth(auth);

        let moved = strategy
            .transition(RecordStatus::Draft, RecordStatus::Validated, &acknowledged_sheet())
            .await;
        assert_eq!(moved, Ok(RecordStatus::Validated));

        let patches = backend.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].1.as_deref(), Some("Bearer user-jwt"));
        assert_eq!(
            patches[0].2,
            json!({
                "status": "validated",
                "updated_at": "2024-03-01T10:00:00.000Z",
                "validated_at": "2024-03-01T10:00:00.000Z",
            })
        );
    }

    #[tokio::test]
    async fn rejected_transition_performs_no_io() {
        let backend = Backend::default();
        let base = spawn(backend.clone()).await;
        let strategy = strategy(&base, Some("rec-1"), None);

        let skipped = strategy
            .transition(RecordStatus::Draft, RecordStatus::Submitted, &acknowledged_sheet())
            .await;
        assert!(skipped.is_err());

        let unreviewed = ReviewSheet::from_record(&match json!({"nom": "Doe"}) {
            Value::Object(map) => map,
            _ => Map::new(),
        });
        let blocked = strategy
            .transition(RecordStatus::Draft, RecordStatus::Validated, &unreviewed)
            .await;
        assert!(blocked.is_err());
        assert!(backend.patches().is_empty());
    }
}
