//! Shared primitives used across DocuValid crates.

pub mod clock;
pub mod request_id;

use core::fmt;

pub use clock::Clock;
pub use clock::FixedClock;
pub use clock::SystemClock;
pub use request_id::RequestId;

/// Result alias used across the workspace.
pub type DocuResult<T> = Result<T, DocuError>;

/// Top-level error type carrying a stable dotted code and a human message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocuError {
    pub code: &'static str,
    pub message: String,
}

impl DocuError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// True when the code belongs to the given dotted namespace (`storage`, `identity`, ...).
    pub fn is_in(&self, namespace: &str) -> bool {
        self.code
            .strip_prefix(namespace)
            .is_some_and(|rest| rest.starts_with('.'))
    }
}

impl fmt::Display for DocuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for DocuError {}

#[cfg(test)]
mod tests {
    use super::DocuError;

    #[test]
    fn display_includes_code_and_message() {
        let error = DocuError::new("storage.disabled", "storage is disabled");
        assert_eq!(error.to_string(), "storage.disabled: storage is disabled");
    }

    #[test]
    fn namespace_match_requires_dot_boundary() {
        let error = DocuError::new("storage.quota_exceeded", "full");
        assert!(error.is_in("storage"));
        assert!(!error.is_in("stor"));
        assert!(!error.is_in("identity"));
    }
}
