//! Page location and query-parameter access.

use dv_core::DocuError;
use dv_core::DocuResult;
use dv_core::RequestId;
use url::Url;

/// Query parameter names checked for a request id, highest priority first.
pub const REQUEST_ID_PARAM_ALIASES: [&str; 3] = ["requestId", "rid", "req_id"];

/// Current page URL as seen by the validation view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    url: Url,
}

impl PageLocation {
    pub fn parse(input: &str) -> DocuResult<Self> {
        let url = Url::parse(input).map_err(|error| {
            DocuError::new(
                "identity.location_invalid",
                format!("failed to parse page URL `{input}`: {error}"),
            )
        })?;

        Ok(Self { url })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// First value for `name`, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// First alias whose value is a well-formed request id.
    pub fn request_id_param(&self) -> Option<RequestId> {
        REQUEST_ID_PARAM_ALIASES.iter().find_map(|alias| {
            self.query_param(alias)
                .and_then(|value| RequestId::from_untrusted(&value))
        })
    }

    /// Returns a copy with `name` set to `value`, replacing earlier values.
    pub fn with_query_param(&self, name: &str, value: &str) -> Self {
        let kept: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(key, _)| key != name)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        let mut url = self.url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (key, existing) in &kept {
                pairs.append_pair(key, existing);
            }
            pairs.append_pair(name, value);
        }
        Self { url }
    }

    /// Returns a copy without any of the request id aliases.
    pub fn without_request_id(&self) -> Self {
        let kept: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(key, _)| !REQUEST_ID_PARAM_ALIASES.contains(&&**key))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        let mut url = self.url.clone();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
        Self { url }
    }
}
