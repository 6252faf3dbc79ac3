//! Command implementations over file-backed storage.

use crate::config::AppConfig;
use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use anyhow::bail;
use dv_core::Clock;
use dv_core::RequestId;
use dv_dispatch::Dispatcher;
use dv_dispatch::LoadState;
use dv_identity::IdentityResolver;
use dv_identity::PageLocation;
use dv_identity::REQUEST_ID_PARAM_ALIASES;
use dv_security::AuthService;
use dv_security::AuthSession;
use dv_storage::FileStorage;
use dv_storage::PayloadStore;
use dv_strategy::SaveOutcome;
use dv_strategy::Strategy;
use dv_strategy::StrategyFactory;
use dv_strategy::StrategyKind;
use dv_strategy::ValidationContext;
use dv_strategy::build_http_client;
use dv_strategy::database::RecordStatus;
use dv_strategy::database::ReviewSheet;
use dv_strategy::database::record_id_from_location;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// User id recorded for sessions opened from a bare token.
const CLI_USER: &str = "cli";

pub struct App {
    config: AppConfig,
    storage: Arc<FileStorage>,
    auth: Option<Arc<AuthService>>,
    clock: Arc<dyn Clock>,
}

impl App {
    pub fn new(config: AppConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let storage = Arc::new(FileStorage::new(config.storage_dir.clone()));
        let auth = match &config.access_token {
            Some(token) => {
                let auth = AuthService::new(clock.clone());
                auth.sign_in(AuthSession {
                    user_id: CLI_USER.to_owned(),
                    access_token: token.clone(),
                    expires_at: None,
                })?;
                Some(Arc::new(auth))
            }
            None => None,
        };

        Ok(Self {
            config,
            storage,
            auth,
            clock,
        })
    }

    /// Signed-in user, if an access token was supplied.
    pub fn signed_in_user(&self) -> Option<String> {
        self.auth.as_ref().and_then(|auth| auth.user_id())
    }

    fn resolver(&self) -> IdentityResolver {
        IdentityResolver::new(self.storage.clone())
    }

    fn payloads(&self) -> PayloadStore {
        PayloadStore::new(self.storage.clone())
            .with_prefix(self.config.storage_prefix.clone())
            .with_clock(self.clock.clone())
    }

    fn factory(&self, record_id: Option<String>) -> Result<StrategyFactory> {
        let client = build_http_client()?;
        let mut factory = StrategyFactory::new(client, self.payloads(), self.clock.clone())
            .with_record_id(record_id);
        if let Some(endpoint) = &self.config.validation_service_url {
            factory = factory.with_webhook_endpoint(endpoint.clone());
        }
        if let Some(database) = &self.config.database {
            factory = factory.with_database(database.clone());
        }
        if let Some(auth) = &self.auth {
            factory = factory.with_auth(auth.clone());
        }
        Ok(factory)
    }

    /// Resolved id and where it came from, without touching storage. Given a
    /// page URL, also returns it rewritten to carry exactly the resolved id.
    pub fn current_id(&self, url: Option<&str>) -> Result<Value> {
        let location = parse_location(url)?;
        let Some(resolution) = self.resolver().resolve_with_source(location.as_ref()) else {
            return Ok(json!({ "request_id": null, "source": null }));
        };

        let mut body = json!({
            "request_id": resolution.id.as_str(),
            "source": resolution.source.as_str(),
        });
        if let Some(location) = &location {
            let share_url = location
                .without_request_id()
                .with_query_param(REQUEST_ID_PARAM_ALIASES[0], resolution.id.as_str());
            body["share_url"] = Value::String(share_url.as_str().to_owned());
        }
        Ok(body)
    }

    pub fn generate_id(&self, persist: bool) -> Result<RequestId> {
        let mut resolver = self.resolver();
        let id = resolver.generate();
        if persist {
            resolver.set(id.as_str())?;
        }
        Ok(id)
    }

    pub fn set_id(&self, raw: &str) -> Result<RequestId> {
        Ok(self.resolver().set(raw)?)
    }

    pub fn clear_id(&self) {
        self.resolver().clear();
    }

    pub async fn load(
        &self,
        kind: StrategyKind,
        url: Option<&str>,
        request_id: Option<&str>,
        record_id: Option<String>,
    ) -> Result<LoadState> {
        let location = parse_location(url)?;
        let request_id = match request_id {
            Some(raw) => Some(RequestId::parse(raw)?),
            None => self.resolver().initialize(location.as_ref()),
        };
        let record_id = record_id.or_else(|| location.as_ref().and_then(record_id_from_location));

        let mut dispatcher = Dispatcher::new(self.factory(record_id)?, kind, request_id);
        let state = dispatcher.load().await.clone();
        Ok(state)
    }

    /// Stores an extraction payload locally under the resolved id.
    pub async fn save(
        &self,
        request_id: Option<&str>,
        data: &Map<String, Value>,
    ) -> Result<SaveOutcome> {
        let request_id = match request_id {
            Some(raw) => RequestId::parse(raw)?,
            None => self
                .resolver()
                .initialize(None)
                .ok_or_else(|| anyhow!("no request id set; pass --request-id or run set-id"))?,
        };

        let strategy = self
            .factory(None)?
            .build(StrategyKind::LocalStorage, ValidationContext::new(Some(request_id)))?;
        let report = strategy.validate(&Value::Object(data.clone())).await;
        if !report.valid {
            bail!("payload rejected: {}", report.errors.join("; "));
        }
        Ok(strategy.save(data).await)
    }

    pub fn cleanup(&self, max_age: Option<Duration>) -> Result<usize> {
        let payloads = self.payloads();
        let removed = match max_age {
            Some(max_age) => payloads.cleanup_older_than(max_age)?,
            None => payloads.cleanup_expired()?,
        };
        info!(removed, "payload cleanup finished");
        Ok(removed)
    }

    /// Loads a database record into a review sheet; with `advance`, acknowledges
    /// every field and moves the record to its next status.
    pub async fn review(
        &self,
        url: Option<&str>,
        record_id: Option<String>,
        advance: bool,
    ) -> Result<Value> {
        let location = parse_location(url)?;
        let request_id = self.resolver().resolve(location.as_ref());
        let record_id = record_id.or_else(|| location.as_ref().and_then(record_id_from_location));

        let strategy = self
            .factory(record_id)?
            .build(StrategyKind::Database, ValidationContext::new(request_id))?;
        let Strategy::Database(database) = strategy else {
            bail!("database strategy expected");
        };

        let result = database.load().await;
        let Some(record) = result.data().cloned() else {
            bail!("{}", result.error().unwrap_or(dv_dispatch::UNEXPECTED_ERROR));
        };

        let mut sheet = ReviewSheet::from_record(&record);
        let mut status = match record.get("status").and_then(Value::as_str) {
            Some(raw) => RecordStatus::parse(raw)?,
            None => RecordStatus::Draft,
        };

        if advance {
            let columns: Vec<String> = sheet.columns().map(ToOwned::to_owned).collect();
            for column in &columns {
                sheet.acknowledge(column)?;
            }
            let target = status
                .next()
                .ok_or_else(|| anyhow!("record is already {}", status.as_str()))?;
            status = database
                .transition(status, target, &sheet)
                .await
                .context("status transition failed")?;
        }

        let fields: Vec<Value> = sheet
            .rendered()
            .into_iter()
            .map(|(column, value)| json!({ "column": column, "value": value }))
            .collect();
        Ok(json!({
            "record_id": database.record_id(),
            "status": status.as_str(),
            "fields": fields,
            "pending": sheet.pending_columns(),
        }))
    }
}

fn parse_location(url: Option<&str>) -> Result<Option<PageLocation>> {
    url.map(PageLocation::parse)
        .transpose()
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::App;
    use crate::config::AppConfig;
    use dv_core::FixedClock;
    use dv_dispatch::LoadState;
    use dv_strategy::StrategyKind;
    use serde_json::Map;
    use serde_json::Value;
    use serde_json::json;
    use std::sync::Arc;

    const NOW: u64 = 1_700_000_000_000;

    fn config(dir: &tempfile::TempDir) -> AppConfig {
        AppConfig {
            storage_dir: dir.path().to_path_buf(),
            storage_prefix: "validation_data".to_owned(),
            validation_service_url: None,
            database: None,
            access_token: None,
        }
    }

    fn app(dir: &tempfile::TempDir, clock: Arc<FixedClock>) -> App {
        match App::new(config(dir), clock) {
            Ok(app) => app,
            Err(error) => panic!("{error}"),
        }
    }

    fn tempdir() -> tempfile::TempDir {
        match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(error) => panic!("{error}"),
        }
    }

    fn payload() -> Map<String, Value> {
        match json!({"victime": {"nom": "Doe", "prenom": "Jane"}}) {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn set_id_survives_a_new_process() {
        let dir = tempdir();
        let clock = Arc::new(FixedClock::new(NOW));
        assert!(app(&dir, clock.clone()).set_id("req_1_abcdef").is_ok());

        let reopened = app(&dir, clock);
        let current = match reopened.current_id(None) {
            Ok(current) => current,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(current, json!({"request_id": "req_1_abcdef", "source": "local"}));

        reopened.clear_id();
        assert_eq!(
            reopened.current_id(None).ok(),
            Some(json!({"request_id": null, "source": null}))
        );
    }

    #[test]
    fn url_takes_priority_and_invalid_ids_are_rejected() {
        let dir = tempdir();
        let app = app(&dir, Arc::new(FixedClock::new(NOW)));
        assert!(app.set_id("req_1_abcdef").is_ok());
        assert!(app.set_id("id with spaces").is_err());

        let current =
            app.current_id(Some("http://localhost:5173/validation?requestId=req_2_zzzzzz"));
        assert_eq!(
            current.ok(),
            Some(json!({
                "request_id": "req_2_zzzzzz",
                "source": "url",
                "share_url": "http://localhost:5173/validation?requestId=req_2_zzzzzz",
            }))
        );
    }

    #[test]
    fn share_url_replaces_id_aliases_with_the_resolved_id() {
        let dir = tempdir();
        let app = app(&dir, Arc::new(FixedClock::new(NOW)));
        assert!(app.set_id("req_1_abcdef").is_ok());

        let current = app.current_id(Some("http://localhost:5173/validation?rid=bad&tab=2"));
        assert_eq!(
            current.ok(),
            Some(json!({
                "request_id": "req_1_abcdef",
                "source": "session",
                "share_url": "http://localhost:5173/validation?tab=2&requestId=req_1_abcdef",
            }))
        );
    }

    #[test]
    fn access_token_signs_in_and_blank_token_is_rejected() {
        let dir = tempdir();
        let clock = Arc::new(FixedClock::new(NOW));
        assert!(app(&dir, clock.clone()).signed_in_user().is_none());

        let mut with_token = config(&dir);
        with_token.access_token = Some("jwt-abc".to_owned());
        let signed_in = match App::new(with_token, clock.clone()) {
            Ok(app) => app,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(signed_in.signed_in_user().as_deref(), Some("cli"));

        let mut blank = config(&dir);
        blank.access_token = Some("   ".to_owned());
        assert!(App::new(blank, clock).is_err());
    }

    #[test]
    fn generated_ids_persist_only_on_request() {
        let dir = tempdir();
        let app = app(&dir, Arc::new(FixedClock::new(NOW)));

        assert!(app.generate_id(false).is_ok());
        assert_eq!(
            app.current_id(None).ok(),
            Some(json!({"request_id": null, "source": null}))
        );

        let persisted = match app.generate_id(true) {
            Ok(id) => id,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(
            app.current_id(None).ok(),
            Some(json!({"request_id": persisted.as_str(), "source": "session"}))
        );
    }

    #[tokio::test]
    async fn save_then_load_through_local_storage() {
        let dir = tempdir();
        let app = app(&dir, Arc::new(FixedClock::new(NOW)));

        let outcome = match app.save(Some("req_1_abcdef"), &payload()).await {
            Ok(outcome) => outcome,
            Err(error) => panic!("{error}"),
        };
        assert!(outcome.success);

        let state = app
            .load(StrategyKind::LocalStorage, None, Some("req_1_abcdef"), None)
            .await;
        match state {
            Ok(LoadState::Success { data, .. }) => assert_eq!(data, payload()),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn load_without_any_id_reports_missing_id() {
        let dir = tempdir();
        let app = app(&dir, Arc::new(FixedClock::new(NOW)));
        let state = app.load(StrategyKind::LocalStorage, None, None, None).await;
        assert_eq!(
            state.ok(),
            Some(LoadState::Error {
                message: "request id missing".to_owned()
            })
        );
    }

    #[tokio::test]
    async fn cleanup_drops_payloads_past_their_ttl() {
        let dir = tempdir();
        let clock = Arc::new(FixedClock::new(NOW));
        let app = app(&dir, clock.clone());
        assert!(app.save(Some("req_1_abcdef"), &payload()).await.is_ok());

        assert_eq!(app.cleanup(None).ok(), Some(0));
        clock.advance(2 * 60 * 60 * 1000);
        assert_eq!(app.cleanup(None).ok(), Some(1));
    }

    #[tokio::test]
    async fn review_requires_database_configuration() {
        let dir = tempdir();
        let app = app(&dir, Arc::new(FixedClock::new(NOW)));
        let review = app.review(None, Some("42".to_owned()), false).await;
        assert!(review.is_err());
    }
}
