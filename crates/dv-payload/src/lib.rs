//! Extracted-document schema and JSON normalization helpers.

pub mod normalize;

use dv_core::DocuError;
use dv_core::DocuResult;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

pub use normalize::clean_data;
pub use normalize::from_dot_notation;
pub use normalize::to_dot_notation;

/// Employer block of an extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmployerInfo {
    #[serde(rename = "raison_sociale", default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub siret: Option<String>,
    #[serde(rename = "adresse", default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(rename = "telephone", default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Injured employee block of an extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VictimInfo {
    #[serde(rename = "nom", default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(rename = "prenom", default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(rename = "date_naissance", default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(rename = "numero_secu", default, skip_serializing_if = "Option::is_none")]
    pub social_security_number: Option<String>,
    #[serde(rename = "adresse", default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(rename = "poste", default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Accident circumstances block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccidentInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "heure", default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(rename = "lieu", default, skip_serializing_if = "Option::is_none")]
    pub place: Option<String>,
    #[serde(rename = "circonstances", default, skip_serializing_if = "Option::is_none")]
    pub circumstances: Option<String>,
    #[serde(rename = "lesions", default, skip_serializing_if = "Option::is_none")]
    pub injuries: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fill ratio reported alongside an extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionStats {
    pub total: u32,
    pub completed: u32,
    pub percentage: f64,
}

/// Follow-up question the reviewer must answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextualQuestion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Structured result of a document extraction run.
///
/// Every section is optional; unknown top-level keys are kept in `extra` so a
/// payload written by a newer workflow survives a round-trip untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedData {
    #[serde(rename = "employeur", default, skip_serializing_if = "Option::is_none")]
    pub employer: Option<EmployerInfo>,
    #[serde(rename = "victime", default, skip_serializing_if = "Option::is_none")]
    pub victim: Option<VictimInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accident: Option<AccidentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_stats: Option<CompletionStats>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contextual_questions: Vec<ContextualQuestion>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExtractedData {
    /// Boundary check: only JSON objects matching the section shapes are accepted.
    pub fn from_value(value: Value) -> DocuResult<Self> {
        if !value.is_object() {
            return Err(DocuError::new(
                "payload.not_an_object",
                format!("extraction payload must be a JSON object, got {}", json_kind(&value)),
            ));
        }

        serde_json::from_value(value).map_err(|error| {
            DocuError::new(
                "payload.schema_invalid",
                format!("extraction payload does not match the expected shape: {error}"),
            )
        })
    }

    pub fn from_map(map: Map<String, Value>) -> DocuResult<Self> {
        Self::from_value(Value::Object(map))
    }

    pub fn from_json_str(raw: &str) -> DocuResult<Self> {
        let value: Value = serde_json::from_str(raw).map_err(|error| {
            DocuError::new(
                "payload.json_invalid",
                format!("extraction payload is not valid JSON: {error}"),
            )
        })?;
        Self::from_value(value)
    }

    pub fn to_map(&self) -> DocuResult<Map<String, Value>> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(DocuError::new(
                "payload.not_an_object",
                format!("extraction serialized to {}", json_kind(&other)),
            )),
            Err(error) => Err(DocuError::new(
                "payload.serialize_failed",
                format!("failed to serialize extraction payload: {error}"),
            )),
        }
    }

    pub fn to_json_string(&self) -> DocuResult<String> {
        serde_json::to_string(self).map_err(|error| {
            DocuError::new(
                "payload.serialize_failed",
                format!("failed to serialize extraction payload: {error}"),
            )
        })
    }

    pub fn is_empty(&self) -> bool {
        self.employer.is_none()
            && self.victim.is_none()
            && self.accident.is_none()
            && self.completion_stats.is_none()
            && self.contextual_questions.is_empty()
            && self.extra.is_empty()
    }

    /// Counts non-empty leaf values across the employer, victim, and accident sections.
    pub fn compute_completion(&self) -> CompletionStats {
        let mut leaves = Vec::new();
        for section in [
            self.employer.as_ref().and_then(|value| serde_json::to_value(value).ok()),
            self.victim.as_ref().and_then(|value| serde_json::to_value(value).ok()),
            self.accident.as_ref().and_then(|value| serde_json::to_value(value).ok()),
        ]
        .into_iter()
        .flatten()
        {
            if let Value::Object(map) = section {
                leaves.extend(to_dot_notation(&map).into_iter().map(|(_, value)| value));
            }
        }

        let total = u32::try_from(leaves.len()).unwrap_or(u32::MAX);
        let completed = u32::try_from(leaves.iter().filter(|value| is_filled(value)).count())
            .unwrap_or(u32::MAX);
        let percentage = if total == 0 {
            0.0
        } else {
            (f64::from(completed) * 100.0 / f64::from(total)).round()
        };

        CompletionStats {
            total,
            completed,
            percentage,
        }
    }

    pub fn unanswered_required_questions(&self) -> Vec<&ContextualQuestion> {
        self.contextual_questions
            .iter()
            .filter(|question| {
                question.required
                    && question
                        .answer
                        .as_deref()
                        .is_none_or(|answer| answer.trim().is_empty())
            })
            .collect()
    }
}

fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::ExtractedData;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "employeur": {"raison_sociale": "ACME", "siret": "12345678900011", "code_naf": "4711D"},
            "victime": {"nom": "Durand", "prenom": "", "numero_secu": "1850575123456"},
            "accident": {"date": "2024-03-02", "lieu": "Entrepot"},
            "contextual_questions": [
                {"id": "q1", "question": "Temoins ?", "required": true},
                {"id": "q2", "question": "Arret ?", "answer": "oui", "required": true}
            ],
            "workflow_version": 3
        })
    }

    #[test]
    fn rejects_non_object_roots() {
        let parsed = ExtractedData::from_value(json!([1, 2, 3]));
        assert!(parsed.is_err());
        if let Err(error) = parsed {
            assert_eq!(error.code, "payload.not_an_object");
        }
    }

    #[test]
    fn rejects_sections_with_wrong_shape() {
        let parsed = ExtractedData::from_value(json!({"employeur": "ACME"}));
        assert!(parsed.is_err());
        if let Err(error) = parsed {
            assert_eq!(error.code, "payload.schema_invalid");
        }
    }

    #[test]
    fn unknown_keys_survive_round_trip() {
        let parsed = match ExtractedData::from_value(sample()) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(parsed.extra.get("workflow_version"), Some(&json!(3)));
        let employer = parsed.employer.clone().unwrap_or_default();
        assert_eq!(employer.extra.get("code_naf"), Some(&json!("4711D")));

        let map = match parsed.to_map() {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(map.get("workflow_version"), Some(&json!(3)));
        assert_eq!(map["employeur"]["siret"], json!("12345678900011"));
    }

    #[test]
    fn completion_counts_filled_leaves() {
        let parsed = match ExtractedData::from_value(sample()) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let stats = parsed.compute_completion();
        // 3 employer + 3 victim + 2 accident leaves, one victim leaf is blank.
        assert_eq!(stats.total, 8);
        assert_eq!(stats.completed, 7);
        assert_eq!(stats.percentage, 88.0);
    }

    #[test]
    fn reports_unanswered_required_questions() {
        let parsed = match ExtractedData::from_value(sample()) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        let open = parsed.unanswered_required_questions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "q1");
    }

    #[test]
    fn empty_object_is_empty_payload() {
        let parsed = ExtractedData::from_json_str("{}");
        assert_eq!(parsed.map(|value| value.is_empty()), Ok(true));
    }
}
