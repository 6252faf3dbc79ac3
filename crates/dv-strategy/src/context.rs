//! Per-strategy validation context.

use dv_core::RequestId;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Inputs shared by every strategy. Owned by the dispatcher, copied into each strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationContext {
    pub request_id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ValidationContext {
    pub fn new(request_id: Option<RequestId>) -> Self {
        Self {
            request_id,
            ..Self::default()
        }
    }

    /// Shallow merge: present fields overwrite, metadata keys merge one level.
    pub fn apply(&mut self, update: ContextUpdate) {
        if let Some(request_id) = update.request_id {
            self.request_id = Some(request_id);
        }
        if let Some(session_id) = update.session_id {
            self.session_id = Some(session_id);
        }
        if let Some(user_id) = update.user_id {
            self.user_id = Some(user_id);
        }
        self.metadata.extend(update.metadata);
    }

    pub(crate) fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Partial context update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextUpdate {
    pub request_id: Option<RequestId>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub metadata: Map<String, Value>,
}

impl ContextUpdate {
    pub fn request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
