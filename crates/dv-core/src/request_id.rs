//! Request identifier contract.

use crate::Clock;
use crate::DocuError;
use crate::DocuResult;
use crate::SystemClock;
use core::fmt;
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use std::sync::LazyLock;

const GENERATED_PREFIX: &str = "req";
const SUFFIX_LEN: usize = 6;
const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static REQUEST_ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{5,100}$").ok());

/// Identifier correlating one upload/validation session end-to-end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestId(String);

impl RequestId {
    pub fn parse(input: &str) -> DocuResult<Self> {
        if is_valid_request_id(input) {
            return Ok(Self(input.to_owned()));
        }

        Err(DocuError::new(
            "identity.invalid_request_id",
            format!(
                "request id must be 5-100 characters of [A-Za-z0-9_-], got {} characters",
                input.chars().count()
            ),
        ))
    }

    /// Lenient parse for untrusted sources: anything invalid is simply absent.
    pub fn from_untrusted(input: &str) -> Option<Self> {
        Self::parse(input).ok()
    }

    /// Builds `req_<unix_ms>_<6 lowercase base36 chars>` from the system clock.
    pub fn generate() -> Self {
        Self::generate_with(&SystemClock, &mut rand::thread_rng())
    }

    pub fn generate_with<C: Clock + ?Sized, R: Rng>(clock: &C, rng: &mut R) -> Self {
        let mut suffix = String::with_capacity(SUFFIX_LEN);
        for _ in 0..SUFFIX_LEN {
            let index = rng.gen_range(0..BASE36_ALPHABET.len());
            suffix.push(char::from(BASE36_ALPHABET[index]));
        }

        Self(format!("{GENERATED_PREFIX}_{}_{suffix}", clock.now_millis()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Second `_`-separated segment, or the whole id when there is no underscore.
    pub fn session_segment(&self) -> &str {
        match self.0.split('_').nth(1) {
            Some(segment) if !segment.is_empty() => segment,
            _ => &self.0,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RequestId {
    type Error = DocuError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_valid_request_id(&value) {
            return Ok(Self(value));
        }
        Err(DocuError::new(
            "identity.invalid_request_id",
            "request id must be 5-100 characters of [A-Za-z0-9_-]",
        ))
    }
}

impl From<RequestId> for String {
    fn from(value: RequestId) -> Self {
        value.0
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn is_valid_request_id(input: &str) -> bool {
    match REQUEST_ID_PATTERN.as_ref() {
        Some(pattern) => pattern.is_match(input),
        None => false,
    }
}
