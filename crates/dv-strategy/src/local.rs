//! Strategy reading extraction payloads persisted in local storage.

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
use dv_core::Clock;
use dv_payload::ExtractedData;
use dv_storage::PayloadStore;
use dv_storage::StorageScope;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing::warn;

#[derive(Clone)]
pub struct LocalStorageStrategy {
    base: StrategyBase,
    payloads: PayloadStore,
}

impl LocalStorageStrategy {
    pub fn new(payloads: PayloadStore, context: ValidationContext, clock: Arc<dyn Clock>) -> Self {
        Self {
            base: StrategyBase::new(StrategyKind::LocalStorage, context, clock),
            payloads,
        }
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
            && self.payloads.storage().is_available(StorageScope::Local)
    }

    pub async fn load(&self) -> ValidationResult {
        let started = Instant::now();
        let Some(request_id) = self.base.request_id().cloned() else {
            return self.fail(REQUEST_ID_MISSING.to_owned());
        };
        self.base.emit(
            EventKind::Load,
            json!({ "key": self.payloads.payload_key(&request_id) }),
        );

        let stored = match self.payloads.load(&request_id) {
            Ok(Some(stored)) => stored,
            Ok(None) => return self.fail("no data found".to_owned()),
            Err(error) if error.code == "storage.payload_corrupt" => {
                warn!(request_id = %request_id, %error, "discarding corrupt payload");
                return self.fail("stored payload is corrupt".to_owned());
            }
            Err(error) => return self.fail(format!("storage unavailable: {}", error.message)),
        };

        let data = match stored.data.to_map() {
            Ok(data) => data,
            Err(error) => return self.fail(error.message),
        };

        let mut metadata = self
            .base
            .metadata()
            .with_duration_ms(elapsed_millis(started))
            .with_extra("field_count", data.len());
        if let Some(stored_at) = stored.stored_at {
            metadata = metadata.with_extra("stored_at", stored_at);
        }

        info!(request_id = %request_id, fields = data.len(), "local payload loaded");
        ValidationResult::success(data, metadata)
    }

    /// Writes `data` back under the current request id with a fresh timestamp.
    pub async fn save(&self, data: &Map<String, Value>) -> SaveOutcome {
        let Some(request_id) = self.base.request_id().cloned() else {
            self.base.emit_error("save", REQUEST_ID_MISSING);
            return SaveOutcome::failed(REQUEST_ID_MISSING);
        };

        let outcome = ExtractedData::from_map(data.clone())
            .and_then(|parsed| self.payloads.save(&request_id, &parsed));
        match outcome {
            Ok(stored_at) => {
                self.base.emit(
                    EventKind::Save,
                    json!({ "request_id": request_id.as_str(), "stored_at": stored_at }),
                );
                SaveOutcome::saved(request_id.as_str())
            }
            Err(error) => {
                warn!(request_id = %request_id, %error, "local save failed");
                self.base.emit_error("save", &error.message);
                SaveOutcome::failed(error.message)
            }
        }
    }

    pub async fn validate(&self, data: &Value) -> ValidationReport {
        let mut errors = Vec::new();
        match data {
            Value::Object(map) if !map.is_empty() => {
                if let Err(error) = ExtractedData::from_map(map.clone()) {
                    errors.push(error.message);
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

    /// Drops payloads older than the store's TTL.
    pub async fn cleanup_expired(&self) -> usize {
        match self.payloads.cleanup_expired() {
            Ok(removed) => {
                self.base
                    .emit(EventKind::Cleanup, json!({ "removed": removed }));
                removed
            }
            Err(error) => {
                warn!(%error, "payload cleanup failed");
                self.base.emit_error("cleanup", &error.message);
                0
            }
        }
    }

    fn fail(&self, message: String) -> ValidationResult {
        warn!(strategy = "localStorage", error = %message, "load failed");
        self.base.emit_error("load", &message);
        ValidationResult::failure(message, Some(self.base.metadata()))
    }
}
