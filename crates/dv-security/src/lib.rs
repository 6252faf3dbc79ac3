//! Origin allow-listing, sensitive-field masking, and the auth session service.

pub mod auth;

use dv_core::DocuError;
use dv_core::DocuResult;
use std::collections::BTreeSet;
use url::Url;

pub use auth::AuthService;
pub use auth::AuthSession;

/// Origins accepted when no allow-list is configured.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &["http://localhost:5173", "http://localhost:3000"];

const SENSITIVE_FIELD_MARKERS: &[&str] = &[
    "numero_secu",
    "social_security",
    "ssn",
    "iban",
    "password",
    "token",
    "secret",
];

const MASK_VISIBLE_SUFFIX: usize = 4;

/// Set of browser origins allowed to call the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginPolicy {
    allowed: BTreeSet<String>,
}

impl Default for OriginPolicy {
    fn default() -> Self {
        Self {
            allowed: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .filter_map(|origin| normalize_origin(origin))
                .collect(),
        }
    }
}

impl OriginPolicy {
    /// Builds a policy from configured entries. Unparsable entries and `*` are rejected.
    pub fn from_entries<I, S>(entries: I) -> DocuResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed = BTreeSet::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            if entry == "*" {
                return Err(DocuError::new(
                    "security.invalid_policy",
                    "wildcard origins are not allowed",
                ));
            }

            let origin = normalize_origin(entry).ok_or_else(|| {
                DocuError::new(
                    "security.invalid_origin",
                    format!("`{entry}` is not a valid origin"),
                )
            })?;
            allowed.insert(origin);
        }

        Ok(Self { allowed })
    }

    /// Parses a comma-separated list such as `DOCUVALID_ALLOWED_ORIGINS`.
    pub fn from_csv(raw: &str) -> DocuResult<Self> {
        Self::from_entries(raw.split(','))
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        normalize_origin(origin).is_some_and(|normalized| self.allowed.contains(&normalized))
    }

    pub fn origins(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

/// Reduces an origin or URL to `scheme://host[:port]`, lowercase, default port elided.
pub fn normalize_origin(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    let origin = url.origin();
    origin
        .is_tuple()
        .then(|| origin.ascii_serialization())
}

/// True when the column or field name carries personal data that must be masked.
pub fn is_sensitive_field(name: &str) -> bool {
    let normalized = name.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return false;
    }

    SENSITIVE_FIELD_MARKERS.iter().any(|marker| {
        normalized == *marker
            || normalized.ends_with(&format!("_{marker}"))
            || normalized.ends_with(&format!(".{marker}"))
    })
}

/// Keeps the last four characters and replaces the rest with `*`.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= MASK_VISIBLE_SUFFIX {
        return "*".repeat(chars.len());
    }

    let hidden = chars.len() - MASK_VISIBLE_SUFFIX;
    let mut out = "*".repeat(hidden);
    out.extend(&chars[hidden..]);
    out
}
