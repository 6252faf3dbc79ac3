//! Page controller driving the active strategy through its load lifecycle.
//!
//! Loads are split into `begin_load` and `apply` so the caller can run the
//! strategy anywhere. Every `begin_load` issues a fresh [`LoadToken`]; `apply`
//! only accepts the most recent token while the view is mounted.

use dv_core::RequestId;
use dv_strategy::REQUEST_ID_MISSING;
use dv_strategy::Strategy;
use dv_strategy::StrategyEvent;
use dv_strategy::StrategyFactory;
use dv_strategy::StrategyKind;
use dv_strategy::ValidationContext;
use dv_strategy::ValidationMetadata;
use dv_strategy::ValidationResult;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Message shown when a load task dies instead of returning a result.
pub const UNEXPECTED_ERROR: &str = "unexpected error";

/// Identifies one load invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LoadToken(u64);

impl LoadToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// View state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LoadState {
    Idle,
    Loading {
        token: LoadToken,
    },
    Success {
        data: Map<String, Value>,
        metadata: Option<ValidationMetadata>,
    },
    /// Successful load that returned an empty object.
    Empty {
        metadata: Option<ValidationMetadata>,
    },
    Error {
        message: String,
    },
}

impl LoadState {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            _ => None,
        }
    }

    fn from_result(result: ValidationResult) -> Self {
        let success = result.is_success();
        let (data, error, metadata) = result.into_parts();
        match (success, data) {
            (true, Some(data)) if data.is_empty() => Self::Empty { metadata },
            (true, Some(data)) => Self::Success { data, metadata },
            (true, None) => Self::Empty { metadata },
            (false, _) => Self::Error {
                message: error.unwrap_or_else(|| UNEXPECTED_ERROR.to_owned()),
            },
        }
    }
}

/// A load running on its own task.
pub struct PendingLoad {
    token: LoadToken,
    handle: JoinHandle<ValidationResult>,
}

impl PendingLoad {
    pub fn token(&self) -> LoadToken {
        self.token
    }

    /// Waits for the task. A panicked or cancelled task becomes an error result.
    pub async fn finish(self) -> (LoadToken, ValidationResult) {
        let result = match self.handle.await {
            Ok(result) => result,
            Err(error) => {
                warn!(token = self.token.value(), %error, "load task failed");
                ValidationResult::failure(UNEXPECTED_ERROR, None)
            }
        };
        (self.token, result)
    }
}

pub struct Dispatcher {
    factory: StrategyFactory,
    kind: StrategyKind,
    request_id: Option<RequestId>,
    active: Option<Strategy>,
    state: LoadState,
    last_token: u64,
    mounted: bool,
}

impl Dispatcher {
    pub fn new(factory: StrategyFactory, kind: StrategyKind, request_id: Option<RequestId>) -> Self {
        Self {
            factory,
            kind,
            request_id,
            active: None,
            state: LoadState::Idle,
            last_token: 0,
            mounted: true,
        }
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Lifecycle log of the active strategy, empty before the first load.
    pub fn events(&self) -> Vec<StrategyEvent> {
        self.active
            .as_ref()
            .map(|strategy| strategy.events().events())
            .unwrap_or_default()
    }

    pub fn mount(&mut self) {
        self.mounted = true;
    }

    /// Later outcomes are discarded; in-flight work is not cancelled.
    pub fn unmount(&mut self) {
        self.mounted = false;
    }

    /// Enters `Loading` and returns the strategy to run, or records why no load happens.
    pub fn begin_load(&mut self) -> Option<(LoadToken, Strategy)> {
        // Any earlier in-flight load is stale from here on, even if this one never starts.
        self.last_token += 1;
        let token = LoadToken(self.last_token);

        if self.request_id.is_none() {
            self.state = LoadState::Error {
                message: REQUEST_ID_MISSING.to_owned(),
            };
            return None;
        }

        let strategy = match self.active_strategy() {
            Ok(strategy) => strategy.clone(),
            Err(message) => {
                warn!(strategy = self.kind.as_str(), error = %message, "strategy unavailable");
                self.state = LoadState::Error { message };
                return None;
            }
        };

        self.state = LoadState::Loading { token };
        debug!(token = token.value(), strategy = self.kind.as_str(), "load started");
        Some((token, strategy))
    }

    /// Applies a finished load if it is still the latest and the view is mounted.
    pub fn apply(&mut self, token: LoadToken, result: ValidationResult) -> bool {
        if !self.mounted {
            debug!(token = token.value(), "discarding load result after unmount");
            return false;
        }
        if token.value() != self.last_token {
            debug!(
                token = token.value(),
                latest = self.last_token,
                "discarding stale load result"
            );
            return false;
        }

        self.state = LoadState::from_result(result);
        match &self.state {
            LoadState::Error { message } => {
                info!(strategy = self.kind.as_str(), error = %message, "load failed");
            }
            _ => info!(strategy = self.kind.as_str(), "load finished"),
        }
        true
    }

    /// begin, run, apply.
    pub async fn load(&mut self) -> &LoadState {
        if let Some((token, strategy)) = self.begin_load() {
            let result = strategy.load().await;
            self.apply(token, result);
        }
        &self.state
    }

    /// Runs the load on a spawned task. Must be called inside a tokio runtime.
    pub fn run_detached(&mut self) -> Option<PendingLoad> {
        let (token, strategy) = self.begin_load()?;
        let handle = tokio::spawn(async move { strategy.load().await });
        Some(PendingLoad { token, handle })
    }

    /// Re-runs the same strategy and request id after an error. Otherwise a no-op.
    pub async fn retry(&mut self) -> &LoadState {
        if matches!(self.state, LoadState::Error { .. }) {
            return self.load().await;
        }
        &self.state
    }

    /// Switches source: back to `Idle` with data cleared, then loads.
    pub async fn select_strategy(&mut self, kind: StrategyKind) -> &LoadState {
        info!(from = self.kind.as_str(), to = kind.as_str(), "strategy switched");
        self.kind = kind;
        self.active = None;
        self.state = LoadState::Idle;
        self.load().await
    }

    /// Rebuilds strategies around the new id and reloads. Unchanged ids are ignored.
    pub async fn set_request_id(&mut self, request_id: Option<RequestId>) -> &LoadState {
        if self.request_id == request_id && !matches!(self.state, LoadState::Idle) {
            return &self.state;
        }

        self.request_id = request_id;
        self.active = None;
        self.load().await
    }

    fn active_strategy(&mut self) -> Result<&Strategy, String> {
        if self.active.is_none() {
            let context = ValidationContext::new(self.request_id.clone());
            let strategy = self
                .factory
                .build(self.kind, context)
                .map_err(|error| error.message)?;
            self.active = Some(strategy);
        }

        self.active
            .as_ref()
            .ok_or_else(|| UNEXPECTED_ERROR.to_owned())
    }
}
