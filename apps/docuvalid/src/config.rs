use anyhow::Result;
use anyhow::bail;
use dv_storage::DEFAULT_PAYLOAD_PREFIX;
use dv_strategy::DatabaseConfig;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing::warn;

pub const DEFAULT_STORAGE_DIR: &str = "./.docuvalid";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage_dir: PathBuf,
    pub storage_prefix: String,
    /// Explicit webhook endpoint; the fixed default applies when unset.
    pub validation_service_url: Option<String>,
    pub database: Option<DatabaseConfig>,
    /// Bearer token for authenticated database writes.
    pub access_token: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok().filter(|value| !value.trim().is_empty()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let storage_dir = lookup("DOCUVALID_STORAGE_DIR").unwrap_or_else(|| {
            info!("DOCUVALID_STORAGE_DIR not set, using default: {DEFAULT_STORAGE_DIR}");
            DEFAULT_STORAGE_DIR.to_owned()
        });
        let storage_prefix = lookup("DOCUVALID_STORAGE_PREFIX")
            .unwrap_or_else(|| DEFAULT_PAYLOAD_PREFIX.to_owned());

        let validation_service_url = lookup("VALIDATION_SERVICE_URL");
        if let Some(url) = &validation_service_url {
            warn!(%url, "VALIDATION_SERVICE_URL overrides the fixed webhook endpoint");
        }

        let database = match (lookup("SUPABASE_URL"), lookup("SUPABASE_ANON_KEY")) {
            (Some(url), Some(key)) => Some(DatabaseConfig::new(&url, key)?),
            (None, None) => {
                info!("SUPABASE_URL not set, database strategy disabled");
                None
            }
            (Some(_), None) => bail!("SUPABASE_URL is set but SUPABASE_ANON_KEY is missing"),
            (None, Some(_)) => bail!("SUPABASE_ANON_KEY is set but SUPABASE_URL is missing"),
        };

        let access_token = lookup("DOCUVALID_ACCESS_TOKEN");

        Ok(Self {
            storage_dir: PathBuf::from(storage_dir),
            storage_prefix,
            validation_service_url,
            database,
            access_token,
        })
    }
}
