//! In-memory storage backend.

use crate::StoragePort;
use crate::StorageScope;
use dv_core::DocuError;
use dv_core::DocuResult;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

type Entries = BTreeMap<(StorageScope, String), String>;

/// Map-backed storage with optional quota and kill switch.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<Entries>,
    quota_bytes: Option<usize>,
    disabled: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the summed key+value byte length per scope.
    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    fn lock(&self) -> DocuResult<MutexGuard<'_, Entries>> {
        if self.disabled.load(Ordering::SeqCst) {
            return Err(DocuError::new(
                "storage.disabled",
                "storage access is disabled",
            ));
        }

        self.entries.lock().map_err(|_| {
            DocuError::new("storage.lock_poisoned", "storage lock poisoned")
        })
    }
}

impl StoragePort for MemoryStorage {
    fn get(&self, scope: StorageScope, key: &str) -> DocuResult<Option<String>> {
        let entries = self.lock()?;
        Ok(entries.get(&(scope, key.to_owned())).cloned())
    }

    fn set(&self, scope: StorageScope, key: &str, value: &str) -> DocuResult<()> {
        let mut entries = self.lock()?;

        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|((entry_scope, entry_key), _)| *entry_scope == scope && entry_key != key)
                .map(|((_, entry_key), entry_value)| entry_key.len() + entry_value.len())
                .sum();
            let needed = used + key.len() + value.len();
            if needed > quota {
                return Err(DocuError::new(
                    "storage.quota_exceeded",
                    format!(
                        "{} storage quota exceeded ({needed} > {quota} bytes)",
                        scope.as_str()
                    ),
                ));
            }
        }

        entries.insert((scope, key.to_owned()), value.to_owned());
        Ok(())
    }

    fn remove(&self, scope: StorageScope, key: &str) -> DocuResult<()> {
        let mut entries = self.lock()?;
        entries.remove(&(scope, key.to_owned()));
        Ok(())
    }

    fn keys(&self, scope: StorageScope) -> DocuResult<Vec<String>> {
        let entries = self.lock()?;
        Ok(entries
            .keys()
            .filter(|(entry_scope, _)| *entry_scope == scope)
            .map(|(_, key)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStorage;
    use crate::StoragePort;
    use crate::StorageScope;

    #[test]
    fn scopes_are_isolated() {
        let storage = MemoryStorage::new();
        assert!(storage.set(StorageScope::Session, "k", "session").is_ok());
        assert!(storage.set(StorageScope::Local, "k", "local").is_ok());

        assert_eq!(
            storage.get(StorageScope::Session, "k"),
            Ok(Some("session".to_owned()))
        );
        assert_eq!(
            storage.get(StorageScope::Local, "k"),
            Ok(Some("local".to_owned()))
        );
        assert_eq!(storage.keys(StorageScope::Local), Ok(vec!["k".to_owned()]));
    }

    #[test]
    fn quota_rejects_oversized_writes() {
        let storage = MemoryStorage::new().with_quota(8);
        assert!(storage.set(StorageScope::Local, "ab", "cd").is_ok());

        let wrote = storage.set(StorageScope::Local, "key", "too-long");
        assert!(wrote.is_err());
        if let Err(error) = wrote {
            assert_eq!(error.code, "storage.quota_exceeded");
        }
        assert_eq!(storage.get(StorageScope::Local, "key"), Ok(None));
    }

    #[test]
    fn overwriting_does_not_double_count_quota() {
        let storage = MemoryStorage::new().with_quota(6);
        assert!(storage.set(StorageScope::Local, "k", "aaaaa").is_ok());
        assert!(storage.set(StorageScope::Local, "k", "bbbbb").is_ok());
    }

    #[test]
    fn disabled_storage_fails_every_call() {
        let storage = MemoryStorage::new();
        storage.set_disabled(true);
        assert!(storage.get(StorageScope::Session, "k").is_err());
        assert!(storage.set(StorageScope::Session, "k", "v").is_err());
        assert!(!storage.is_available(StorageScope::Session));

        storage.set_disabled(false);
        assert!(storage.is_available(StorageScope::Session));
    }

    #[test]
    fn removing_absent_key_is_ok() {
        let storage = MemoryStorage::new();
        assert!(storage.remove(StorageScope::Local, "missing").is_ok());
    }
}
