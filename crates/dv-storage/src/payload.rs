//! Extraction payload persistence keyed by request id.

use crate::StoragePort;
use crate::StorageScope;
use dv_core::Clock;
use dv_core::DocuError;
use dv_core::DocuResult;
use dv_core::RequestId;
use dv_core::SystemClock;
use dv_payload::ExtractedData;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub const DEFAULT_PAYLOAD_PREFIX: &str = "validation_data";
pub const PAYLOAD_TTL: Duration = Duration::from_secs(60 * 60);
const TIMESTAMP_SUFFIX: &str = "_timestamp";

/// Payload read back together with its write time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPayload {
    pub data: ExtractedData,
    pub stored_at: Option<u64>,
}

/// Persists extraction payloads under `<prefix>_<id>` plus `<prefix>_<id>_timestamp`.
#[derive(Clone)]
pub struct PayloadStore {
    storage: Arc<dyn StoragePort>,
    clock: Arc<dyn Clock>,
    prefix: String,
}

impl PayloadStore {
    pub fn new(storage: Arc<dyn StoragePort>) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
            prefix: DEFAULT_PAYLOAD_PREFIX.to_owned(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn storage(&self) -> &Arc<dyn StoragePort> {
        &self.storage
    }

    pub fn payload_key(&self, id: &RequestId) -> String {
        format!("{}_{id}", self.prefix)
    }

    pub fn timestamp_key(&self, id: &RequestId) -> String {
        format!("{}_{id}{TIMESTAMP_SUFFIX}", self.prefix)
    }

    /// Writes payload and timestamp; a failed timestamp write rolls the payload back.
    pub fn save(&self, id: &RequestId, data: &ExtractedData) -> DocuResult<u64> {
        let encoded = data.to_json_string()?;
        let now = self.clock.now_millis();
        let payload_key = self.payload_key(id);

        self.storage.set(StorageScope::Local, &payload_key, &encoded)?;
        if let Err(error) =
            self.storage
                .set(StorageScope::Local, &self.timestamp_key(id), &now.to_string())
        {
            let _ = self.storage.remove(StorageScope::Local, &payload_key);
            return Err(error);
        }

        debug!(request_id = %id, bytes = encoded.len(), "stored extraction payload");
        Ok(now)
    }

    pub fn load(&self, id: &RequestId) -> DocuResult<Option<StoredPayload>> {
        let Some(raw) = self.storage.get(StorageScope::Local, &self.payload_key(id))? else {
            return Ok(None);
        };

        let data = ExtractedData::from_json_str(&raw).map_err(|error| {
            DocuError::new(
                "storage.payload_corrupt",
                format!("stored payload for `{id}` is unreadable: {}", error.message),
            )
        })?;
        let stored_at = self.read_timestamp(id)?;

        Ok(Some(StoredPayload { data, stored_at }))
    }

    pub fn remove(&self, id: &RequestId) -> DocuResult<()> {
        self.storage
            .remove(StorageScope::Local, &self.payload_key(id))?;
        self.storage
            .remove(StorageScope::Local, &self.timestamp_key(id))
    }

    /// Removes payloads older than one hour.
    pub fn cleanup_expired(&self) -> DocuResult<usize> {
        self.cleanup_older_than(PAYLOAD_TTL)
    }

    /// Removes payloads whose age exceeds `max_age`, plus any whose timestamp is missing or unreadable.
    pub fn cleanup_older_than(&self, max_age: Duration) -> DocuResult<usize> {
        let now = self.clock.now_millis();
        let max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        let key_prefix = format!("{}_", self.prefix);

        let suffixes: BTreeSet<String> = self
            .storage
            .keys(StorageScope::Local)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&key_prefix).map(ToOwned::to_owned))
            .collect();

        // A suffix is a payload id when its timestamp companion exists. Ids may
        // themselves end in `_timestamp`, so the suffix alone decides nothing.
        let mut ids = BTreeSet::new();
        for suffix in &suffixes {
            let has_companion = suffixes.contains(&format!("{suffix}{TIMESTAMP_SUFFIX}"));
            let raw_id = match suffix.strip_suffix(TIMESTAMP_SUFFIX) {
                Some(base) if !has_companion => base,
                _ => suffix.as_str(),
            };
            if let Some(id) = RequestId::from_untrusted(raw_id) {
                ids.insert(id);
            }
        }

        let mut removed = 0_usize;
        for id in ids {
            let expired = match self.read_timestamp(&id) {
                Ok(Some(stored_at)) => now.saturating_sub(stored_at) > max_age_ms,
                Ok(None) => true,
                Err(error) => {
                    warn!(request_id = %id, %error, "unreadable payload timestamp, removing entry");
                    true
                }
            };

            if expired {
                self.remove(&id)?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "expired extraction payloads cleaned up");
        }
        Ok(removed)
    }

    fn read_timestamp(&self, id: &RequestId) -> DocuResult<Option<u64>> {
        let Some(raw) = self
            .storage
            .get(StorageScope::Local, &self.timestamp_key(id))?
        else {
            return Ok(None);
        };

        raw.trim().parse::<u64>().map(Some).map_err(|error| {
            DocuError::new(
                "storage.timestamp_invalid",
                format!("payload timestamp `{raw}` for `{id}` is not epoch millis: {error}"),
            )
        })
    }
}
