//! Environment-driven gateway settings.

use crate::error::GatewayError;
use dv_security::OriginPolicy;
use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use tracing::warn;

pub const DEFAULT_BIND: &str = "127.0.0.1:3001";
pub const DEFAULT_FORWARD_URL: &str = "https://n8n.localhost/webhook/validation-created";
pub const DEFAULT_FORWARD_TIMEOUT_SECS: &str = "30";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    pub allowed_origins: OriginPolicy,
    pub webhook_url: String,
    pub forward_timeout: Duration,
}

impl GatewayConfig {
    /// Reads `DOCUVALID_BIND`, `DOCUVALID_ALLOWED_ORIGINS`, `DOCUVALID_WEBHOOK_URL`
    /// and `DOCUVALID_FORWARD_TIMEOUT_SECS` from the process environment.
    pub fn load() -> Result<Self, GatewayError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GatewayError> {
        let allowed_origins = match lookup("DOCUVALID_ALLOWED_ORIGINS") {
            Some(raw) => OriginPolicy::from_csv(&raw)?,
            None => {
                info!("DOCUVALID_ALLOWED_ORIGINS not set, allowing local dev origins");
                OriginPolicy::default()
            }
        };
        if allowed_origins.is_empty() {
            warn!("origin allow-list is empty, every browser request will be rejected");
        }

        let webhook_url: String =
            try_load(&lookup, "DOCUVALID_WEBHOOK_URL", DEFAULT_FORWARD_URL)?;
        match url::Url::parse(&webhook_url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => {
                return Err(GatewayError::Config(format!(
                    "DOCUVALID_WEBHOOK_URL `{webhook_url}` is not an http(s) URL"
                )));
            }
        }

        let timeout_secs: u64 = try_load(
            &lookup,
            "DOCUVALID_FORWARD_TIMEOUT_SECS",
            DEFAULT_FORWARD_TIMEOUT_SECS,
        )?;

        Ok(Self {
            bind: try_load(&lookup, "DOCUVALID_BIND", DEFAULT_BIND)?,
            allowed_origins,
            webhook_url,
            forward_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<T, GatewayError>
where
    T::Err: Display,
{
    lookup(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_owned()
        })
        .parse()
        .map_err(|error| {
            warn!("Invalid {key} value: {error}");
            GatewayError::Config(format!("invalid {key}: {error}"))
        })
}

#[cfg(test)]
mod tests {
    use super::DEFAULT_FORWARD_URL;
    use super::GatewayConfig;
    use std::collections::HashMap;
    use std::time::Duration;

    fn config(vars: &[(&str, &str)]) -> Result<GatewayConfig, crate::error::GatewayError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        GatewayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = match config(&[]) {
            Ok(config) => config,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(config.bind.to_string(), "127.0.0.1:3001");
        assert_eq!(config.webhook_url, DEFAULT_FORWARD_URL);
        assert_eq!(config.forward_timeout, Duration::from_secs(30));
        assert!(config.allowed_origins.is_allowed("http://localhost:5173"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = match config(&[
            ("DOCUVALID_BIND", "0.0.0.0:8080"),
            ("DOCUVALID_ALLOWED_ORIGINS", "https://app.example.com, https://admin.example.com"),
            ("DOCUVALID_WEBHOOK_URL", "http://127.0.0.1:5678/webhook/validation-created"),
            ("DOCUVALID_FORWARD_TIMEOUT_SECS", "5"),
        ]) {
            Ok(config) => config,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(config.bind.port(), 8080);
        assert!(config.allowed_origins.is_allowed("https://admin.example.com"));
        assert!(!config.allowed_origins.is_allowed("http://localhost:5173"));
        assert_eq!(config.forward_timeout, Duration::from_secs(5));
    }

    #[test]
    fn misconfiguration_is_an_error() {
        assert!(config(&[("DOCUVALID_BIND", "localhost")]).is_err());
        assert!(config(&[("DOCUVALID_ALLOWED_ORIGINS", "*")]).is_err());
        assert!(config(&[("DOCUVALID_WEBHOOK_URL", "ftp://files")]).is_err());
        assert!(config(&[("DOCUVALID_FORWARD_TIMEOUT_SECS", "soon")]).is_err());
    }
}
