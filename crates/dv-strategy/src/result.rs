//! Load, save, and validate outcomes.

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Data source tag carried in metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Source {
    #[serde(rename = "webhook")]
    Webhook,
    #[serde(rename = "localStorage")]
    LocalStorage,
    #[serde(rename = "database")]
    Database,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::LocalStorage => "localStorage",
            Self::Database => "database",
        }
    }
}

/// Diagnostics attached to one strategy call. Built once, then read-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationMetadata {
    timestamp: u64,
    request_id: String,
    source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    extra: Map<String, Value>,
}

impl ValidationMetadata {
    pub fn new(source: Source, request_id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            timestamp,
            request_id: request_id.into(),
            source,
            duration_ms: None,
            status: None,
            extra: Map::new(),
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// Outcome of `load`. Success never carries an error; failure never carries data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<ValidationMetadata>,
}

impl ValidationResult {
    pub fn success(data: Map<String, Value>, metadata: ValidationMetadata) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: Some(metadata),
        }
    }

    pub fn failure(error: impl Into<String>, metadata: Option<ValidationMetadata>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn metadata(&self) -> Option<&ValidationMetadata> {
        self.metadata.as_ref()
    }

    pub fn into_parts(
        self,
    ) -> (
        Option<Map<String, Value>>,
        Option<String>,
        Option<ValidationMetadata>,
    ) {
        (self.data, self.error, self.metadata)
    }
}

/// Outcome of `save`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SaveOutcome {
    pub fn saved(id: impl Into<String>) -> Self {
        Self {
            success: true,
            id: Some(id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            error: Some(error.into()),
        }
    }

    pub fn not_supported() -> Self {
        Self::failed("not supported")
    }
}

/// Outcome of `validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}
