//! Interchangeable data sources behind one load/save/validate contract.
//!
//! The set of sources is closed: [`Strategy`] is an enum and every call is a
//! `match`. Strategies never fail across this boundary; transport, parse, and
//! storage problems come back as data inside [`ValidationResult`] or
//! [`SaveOutcome`].

mod base;
pub mod context;
pub mod database;
pub mod events;
pub mod local;
pub mod result;
pub mod webhook;

use core::fmt;
use core::str::FromStr;
use dv_core::Clock;
use dv_core::DocuError;
use dv_core::DocuResult;
use dv_security::AuthService;
use dv_storage::PayloadStore;
use reqwest::Client;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub use context::ContextUpdate;
pub use context::ValidationContext;
pub use database::DatabaseConfig;
pub use database::DatabaseStrategy;
pub use events::EventKind;
pub use events::EventLog;
pub use events::StrategyEvent;
pub use local::LocalStorageStrategy;
pub use result::SaveOutcome;
pub use result::Source;
pub use result::ValidationMetadata;
pub use result::ValidationReport;
pub use result::ValidationResult;
pub use webhook::DEFAULT_WEBHOOK_URL;
pub use webhook::WEBHOOK_TIMEOUT;
pub use webhook::WebhookStrategy;

/// Error surfaced when a load is attempted without a request id.
pub const REQUEST_ID_MISSING: &str = "request id missing";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StrategyKind {
    #[serde(rename = "webhook")]
    Webhook,
    #[serde(rename = "localStorage")]
    LocalStorage,
    #[serde(rename = "database")]
    Database,
}

impl StrategyKind {
    pub const ALL: [Self; 3] = [Self::Webhook, Self::LocalStorage, Self::Database];

    pub fn as_str(self) -> &'static str {
        self.source().as_str()
    }

    pub fn source(self) -> Source {
        match self {
            Self::Webhook => Source::Webhook,
            Self::LocalStorage => Source::LocalStorage,
            Self::Database => Source::Database,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = DocuError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "webhook" | "n8n" => Ok(Self::Webhook),
            "localstorage" | "local-storage" | "local" => Ok(Self::LocalStorage),
            "database" | "db" => Ok(Self::Database),
            other => Err(DocuError::new(
                "strategy.unknown_kind",
                format!("unknown strategy `{other}`"),
            )),
        }
    }
}

/// One configured data source.
#[derive(Clone)]
pub enum Strategy {
    Webhook(WebhookStrategy),
    LocalStorage(LocalStorageStrategy),
    Database(DatabaseStrategy),
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Webhook(_) => StrategyKind::Webhook,
            Self::LocalStorage(_) => StrategyKind::LocalStorage,
            Self::Database(_) => StrategyKind::Database,
        }
    }

    pub fn context(&self) -> &ValidationContext {
        match self {
            Self::Webhook(strategy) => strategy.context(),
            Self::LocalStorage(strategy) => strategy.context(),
            Self::Database(strategy) => strategy.context(),
        }
    }

    pub fn events(&self) -> &EventLog {
        match self {
            Self::Webhook(strategy) => strategy.events(),
            Self::LocalStorage(strategy) => strategy.events(),
            Self::Database(strategy) => strategy.events(),
        }
    }

    pub fn update_context(&mut self, update: ContextUpdate) {
        match self {
            Self::Webhook(strategy) => strategy.update_context(update),
            Self::LocalStorage(strategy) => strategy.update_context(update),
            Self::Database(strategy) => strategy.update_context(update),
        }
    }

    pub async fn can_use(&self) -> bool {
        match self {
            Self::Webhook(strategy) => strategy.can_use().await,
            Self::LocalStorage(strategy) => strategy.can_use().await,
            Self::Database(strategy) => strategy.can_use().await,
        }
    }

    pub async fn load(&self) -> ValidationResult {
        match self {
            Self::Webhook(strategy) => strategy.load().await,
            Self::LocalStorage(strategy) => strategy.load().await,
            Self::Database(strategy) => strategy.load().await,
        }
    }

    pub async fn save(&self, data: &Map<String, Value>) -> SaveOutcome {
        match self {
            Self::Webhook(strategy) => strategy.save(data).await,
            Self::LocalStorage(strategy) => strategy.save(data).await,
            Self::Database(strategy) => strategy.save(data).await,
        }
    }

    pub async fn validate(&self, data: &Value) -> ValidationReport {
        match self {
            Self::Webhook(strategy) => strategy.validate(data).await,
            Self::LocalStorage(strategy) => strategy.validate(data).await,
            Self::Database(strategy) => strategy.validate(data).await,
        }
    }

    /// Expired-payload cleanup; only local storage holds anything to clean.
    pub async fn cleanup(&self) -> usize {
        match self {
            Self::LocalStorage(strategy) => strategy.cleanup_expired().await,
            Self::Webhook(_) | Self::Database(_) => 0,
        }
    }
}

/// Shared HTTP client for the webhook and database strategies.
pub fn build_http_client() -> DocuResult<Client> {
    Client::builder()
        .user_agent(concat!("docuvalid/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|error| {
            DocuError::new(
                "strategy.http_client_failed",
                format!("failed to build HTTP client: {error}"),
            )
        })
}

/// Builds strategies for a given context from long-lived collaborators.
#[derive(Clone)]
pub struct StrategyFactory {
    client: Client,
    payloads: PayloadStore,
    clock: Arc<dyn Clock>,
    webhook_endpoint: Option<String>,
    webhook_timeout: Duration,
    database: Option<DatabaseConfig>,
    auth: Option<Arc<AuthService>>,
    record_id: Option<String>,
}

impl StrategyFactory {
    pub fn new(client: Client, payloads: PayloadStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            payloads,
            clock,
            webhook_endpoint: None,
            webhook_timeout: WEBHOOK_TIMEOUT,
            database: None,
            auth: None,
            record_id: None,
        }
    }

    /// Overrides the fixed webhook endpoint for every strategy built afterwards.
    pub fn with_webhook_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.webhook_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_webhook_timeout(mut self, timeout: Duration) -> Self {
        self.webhook_timeout = timeout;
        self
    }

    pub fn with_database(mut self, config: DatabaseConfig) -> Self {
        self.database = Some(config);
        self
    }

    pub fn with_auth(mut self, auth: Arc<AuthService>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_record_id(mut self, record_id: Option<String>) -> Self {
        self.record_id = record_id;
        self
    }

    pub fn payloads(&self) -> &PayloadStore {
        &self.payloads
    }

    /// Kinds that can be built with the current configuration.
    pub fn available_kinds(&self) -> Vec<StrategyKind> {
        StrategyKind::ALL
            .into_iter()
            .filter(|kind| *kind != StrategyKind::Database || self.database.is_some())
            .collect()
    }

    pub fn build(&self, kind: StrategyKind, context: ValidationContext) -> DocuResult<Strategy> {
        match kind {
            StrategyKind::Webhook => {
                let mut strategy =
                    WebhookStrategy::new(self.client.clone(), context, self.clock.clone())
                        .with_timeout(self.webhook_timeout);
                if let Some(endpoint) = &self.webhook_endpoint {
                    strategy = strategy.with_endpoint(endpoint)?;
                }
                Ok(Strategy::Webhook(strategy))
            }
            StrategyKind::LocalStorage => Ok(Strategy::LocalStorage(LocalStorageStrategy::new(
                self.payloads.clone(),
                context,
                self.clock.clone(),
            ))),
            StrategyKind::Database => {
                let config = self.database.clone().ok_or_else(|| {
                    DocuError::new(
                        "strategy.database_unconfigured",
                        "database URL and anon key are not configured",
                    )
                })?;
                let mut strategy = DatabaseStrategy::new(
                    self.client.clone(),
                    config,
                    context,
                    self.clock.clone(),
                )
                .with_record_id(self.record_id.clone());
                if let Some(auth) = &self.auth {
                    strategy = strategy.with_auth(auth.clone());
                }
                Ok(Strategy::Database(strategy))
            }
        }
    }
}
