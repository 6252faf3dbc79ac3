//! Record review: cell rendering, acknowledgement tracking, and status lifecycle.

use chrono::DateTime;
use chrono::Utc;
use dv_core::DocuError;
use dv_core::DocuResult;
use dv_security::is_sensitive_field;
use dv_security::mask_value;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::collections::BTreeMap;

/// Bookkeeping columns excluded from review.
pub const SYSTEM_COLUMNS: &[&str] = &[
    "id",
    "status",
    "created_at",
    "updated_at",
    "validated_at",
    "submitted_at",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Null,
    Boolean,
    Number,
    Timestamp,
    Text,
    Json,
}

impl ColumnKind {
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(text) if DateTime::parse_from_rfc3339(text).is_ok() => Self::Timestamp,
            Value::String(_) => Self::Text,
            Value::Array(_) | Value::Object(_) => Self::Json,
        }
    }
}

/// Display string for one cell. Sensitive columns are masked whatever their type.
pub fn render_cell(column: &str, value: &Value) -> String {
    if is_sensitive_field(column) {
        let plain = match value {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        return mask_value(&plain);
    }

    match (ColumnKind::infer(value), value) {
        (ColumnKind::Null, _) => "-".to_owned(),
        (ColumnKind::Boolean, Value::Bool(flag)) => (if *flag { "yes" } else { "no" }).to_owned(),
        (ColumnKind::Timestamp, Value::String(text)) => DateTime::parse_from_rfc3339(text)
            .map(|parsed| {
                parsed
                    .with_timezone(&Utc)
                    .format("%Y-%m-%d %H:%M:%S UTC")
                    .to_string()
            })
            .unwrap_or_else(|_| text.clone()),
        (ColumnKind::Text, Value::String(text)) => text.clone(),
        (ColumnKind::Json, _) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        (_, other) => other.to_string(),
    }
}

/// Review state of one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewField {
    kind: ColumnKind,
    value: Value,
    acknowledged: bool,
    draft: Option<String>,
    error: Option<String>,
}

impl ReviewField {
    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// Rejected text kept for re-editing.
    pub fn draft(&self) -> Option<&str> {
        self.draft.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Per-record review checklist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewSheet {
    fields: BTreeMap<String, ReviewField>,
}

impl ReviewSheet {
    pub fn from_record(record: &Map<String, Value>) -> Self {
        let fields = record
            .iter()
            .filter(|(column, _)| !SYSTEM_COLUMNS.contains(&column.as_str()))
            .map(|(column, value)| {
                (
                    column.clone(),
                    ReviewField {
                        kind: ColumnKind::infer(value),
                        value: value.clone(),
                        acknowledged: false,
                        draft: None,
                        error: None,
                    },
                )
            })
            .collect();
        Self { fields }
    }

    pub fn field(&self, column: &str) -> Option<&ReviewField> {
        self.fields.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn acknowledge(&mut self, column: &str) -> DocuResult<()> {
        self.field_mut(column)?.acknowledged = true;
        Ok(())
    }

    /// Replaces a JSON column after a parse/serialize round trip.
    ///
    /// Rejected input is kept as a draft with its error, and the field counts
    /// as invalid until a later edit succeeds. Any edit clears acknowledgement.
    pub fn edit_json(&mut self, column: &str, raw: &str) -> DocuResult<()> {
        let field = self.field_mut(column)?;
        if field.kind != ColumnKind::Json {
            return Err(DocuError::new(
                "review.not_json_field",
                format!("column `{column}` does not hold JSON"),
            ));
        }
        field.acknowledged = false;

        match round_trip_json(raw) {
            Ok(value) => {
                field.value = value;
                field.draft = None;
                field.error = None;
                Ok(())
            }
            Err(message) => {
                field.draft = Some(raw.to_owned());
                field.error = Some(message.clone());
                Err(DocuError::new(
                    "review.json_invalid",
                    format!("column `{column}`: {message}"),
                ))
            }
        }
    }

    pub fn all_acknowledged(&self) -> bool {
        self.fields.values().all(|field| field.acknowledged)
    }

    pub fn all_json_valid(&self) -> bool {
        self.fields.values().all(|field| field.error.is_none())
    }

    pub fn json_errors(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .filter_map(|(column, field)| {
                field
                    .error
                    .as_ref()
                    .map(|error| (column.clone(), error.clone()))
            })
            .collect()
    }

    pub fn pending_columns(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, field)| !field.acknowledged)
            .map(|(column, _)| column.as_str())
            .collect()
    }

    pub fn rendered(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|(column, field)| (column.clone(), render_cell(column, &field.value)))
            .collect()
    }

    /// Current values of every reviewed column.
    pub fn values(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(column, field)| (column.clone(), field.value.clone()))
            .collect()
    }

    fn field_mut(&mut self, column: &str) -> DocuResult<&mut ReviewField> {
        self.fields.get_mut(column).ok_or_else(|| {
            DocuError::new(
                "review.unknown_field",
                format!("column `{column}` is not part of this record"),
            )
        })
    }
}

fn round_trip_json(raw: &str) -> Result<Value, String> {
    let parsed: Value =
        serde_json::from_str(raw).map_err(|error| format!("invalid JSON: {error}"))?;
    let encoded =
        serde_json::to_string(&parsed).map_err(|error| format!("cannot serialize: {error}"))?;
    let reparsed: Value =
        serde_json::from_str(&encoded).map_err(|error| format!("unstable JSON: {error}"))?;

    if reparsed != parsed {
        return Err("JSON does not survive a round trip".to_owned());
    }
    Ok(reparsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Draft,
    Validated,
    Submitted,
}

impl RecordStatus {
    pub fn parse(raw: &str) -> DocuResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "validated" => Ok(Self::Validated),
            "submitted" => Ok(Self::Submitted),
            other => Err(DocuError::new(
                "review.status_unknown",
                format!("unknown record status `{other}`"),
            )),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Validated => "validated",
            Self::Submitted => "submitted",
        }
    }

    pub fn next(self) -> Option<Self> {
        match self {
            Self::Draft => Some(Self::Validated),
            Self::Validated => Some(Self::Submitted),
            Self::Submitted => None,
        }
    }

    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }

    /// Column stamped when a record enters this status.
    pub fn timestamp_column(self) -> Option<&'static str> {
        match self {
            Self::Draft => None,
            Self::Validated => Some("validated_at"),
            Self::Submitted => Some("submitted_at"),
        }
    }

    /// Rejects illegal transitions and unfinished reviews before any I/O.
    pub fn check_transition(self, target: Self, sheet: &ReviewSheet) -> DocuResult<()> {
        if !self.can_transition_to(target) {
            return Err(DocuError::new(
                "review.illegal_transition",
                format!(
                    "cannot move record from {} to {}",
                    self.as_str(),
                    target.as_str()
                ),
            ));
        }
        if !sheet.all_acknowledged() {
            return Err(DocuError::new(
                "review.unacknowledged_fields",
                format!(
                    "fields not yet acknowledged: {}",
                    sheet.pending_columns().join(", ")
                ),
            ));
        }
        if !sheet.all_json_valid() {
            let columns: Vec<String> = sheet
                .json_errors()
                .into_iter()
                .map(|(column, _)| column)
                .collect();
            return Err(DocuError::new(
                "review.json_invalid",
                format!("fields with invalid JSON: {}", columns.join(", ")),
            ));
        }
        Ok(())
    }
}
