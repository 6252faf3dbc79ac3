//! File-backed storage: session scope in memory, local scope in one JSON document.

use crate::MemoryStorage;
use crate::StoragePort;
use crate::StorageScope;
use dv_core::DocuError;
use dv_core::DocuResult;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

/// File holding the local scope under the storage root.
pub const LOCAL_STORE_FILE: &str = "local.json";

type Entries = BTreeMap<String, String>;

/// Storage port whose local scope survives restarts.
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
    ephemeral: bool,
    session: MemoryStorage,
    io_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ephemeral: false,
            session: MemoryStorage::new(),
            io_lock: Mutex::new(()),
        }
    }

    /// Local scope becomes unavailable; session scope keeps working.
    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn local_path(&self) -> PathBuf {
        self.root.join(LOCAL_STORE_FILE)
    }

    fn with_local<T>(&self, action: impl FnOnce(&Path) -> DocuResult<T>) -> DocuResult<T> {
        if self.ephemeral {
            return Err(DocuError::new(
                "storage.persistence_disabled",
                "persistent storage is disabled in ephemeral mode",
            ));
        }

        let _guard = self
            .io_lock
            .lock()
            .map_err(|_| DocuError::new("storage.lock_poisoned", "local store lock poisoned"))?;
        action(&self.local_path())
    }
}

impl StoragePort for FileStorage {
    fn get(&self, scope: StorageScope, key: &str) -> DocuResult<Option<String>> {
        match scope {
            StorageScope::Session => self.session.get(scope, key),
            StorageScope::Local => self.with_local(|path| Ok(read_entries(path)?.remove(key))),
        }
    }

    fn set(&self, scope: StorageScope, key: &str, value: &str) -> DocuResult<()> {
        match scope {
            StorageScope::Session => self.session.set(scope, key, value),
            StorageScope::Local => self.with_local(|path| {
                let mut entries = read_entries(path)?;
                entries.insert(key.to_owned(), value.to_owned());
                write_entries(path, &entries)
            }),
        }
    }

    fn remove(&self, scope: StorageScope, key: &str) -> DocuResult<()> {
        match scope {
            StorageScope::Session => self.session.remove(scope, key),
            StorageScope::Local => self.with_local(|path| {
                let mut entries = read_entries(path)?;
                if entries.remove(key).is_none() {
                    return Ok(());
                }
                write_entries(path, &entries)
            }),
        }
    }

    fn keys(&self, scope: StorageScope) -> DocuResult<Vec<String>> {
        match scope {
            StorageScope::Session => self.session.keys(scope),
            StorageScope::Local => {
                self.with_local(|path| Ok(read_entries(path)?.into_keys().collect()))
            }
        }
    }
}

fn read_entries(path: &Path) -> DocuResult<Entries> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Entries::new()),
        Err(error) => {
            return Err(DocuError::new(
                "storage.read_failed",
                format!("failed to read `{}`: {error}", path.display()),
            ));
        }
    };

    serde_json::from_str(&raw).map_err(|error| {
        DocuError::new(
            "storage.file_corrupt",
            format!("`{}` is not a JSON string map: {error}", path.display()),
        )
    })
}

/// Replaces the document whole; an empty store leaves no file behind.
fn write_entries(path: &Path, entries: &Entries) -> DocuResult<()> {
    if entries.is_empty() {
        return match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(DocuError::new(
                "storage.write_failed",
                format!("failed to remove `{}`: {error}", path.display()),
            )),
        };
    }

    let write_failed = |error: std::io::Error| {
        DocuError::new(
            "storage.write_failed",
            format!("failed to write `{}`: {error}", path.display()),
        )
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_failed)?;
    }
    let encoded = serde_json::to_string_pretty(entries).map_err(|error| {
        DocuError::new("storage.write_failed", format!("failed to encode store: {error}"))
    })?;

    let staging = path.with_extension("json.tmp");
    fs::write(&staging, encoded).map_err(write_failed)?;
    fs::rename(&staging, path).map_err(write_failed)?;
    debug!(path = %path.display(), entries = entries.len(), "local store written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::FileStorage;
    use super::LOCAL_STORE_FILE;
    use crate::StoragePort;
    use crate::StorageScope;
    use std::fs;

    fn temp_root() -> tempfile::TempDir {
        match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn local_value_survives_new_instance() {
        let root = temp_root();
        let storage = FileStorage::new(root.path());
        assert!(storage.set(StorageScope::Local, "lastRequestId", "req_1_abcdef").is_ok());

        let reopened = FileStorage::new(root.path());
        assert_eq!(
            reopened.get(StorageScope::Local, "lastRequestId"),
            Ok(Some("req_1_abcdef".to_owned()))
        );
    }

    #[test]
    fn session_value_does_not_survive_new_instance() {
        let root = temp_root();
        let storage = FileStorage::new(root.path());
        assert!(storage.set(StorageScope::Session, "current_request_id", "req12").is_ok());
        assert_eq!(
            storage.get(StorageScope::Session, "current_request_id"),
            Ok(Some("req12".to_owned()))
        );

        let reopened = FileStorage::new(root.path());
        assert_eq!(reopened.get(StorageScope::Session, "current_request_id"), Ok(None));
    }

    #[test]
    fn ephemeral_mode_blocks_persistence() {
        let root = temp_root();
        let storage = FileStorage::new(root.path()).ephemeral();

        let wrote = storage.set(StorageScope::Local, "k", "v");
        assert!(wrote.is_err());
        if let Err(error) = wrote {
            assert_eq!(error.code, "storage.persistence_disabled");
        }
        assert!(!storage.is_available(StorageScope::Local));
        assert!(storage.set(StorageScope::Session, "k", "v").is_ok());
        assert!(!root.path().join(LOCAL_STORE_FILE).exists());
    }

    #[test]
    fn store_is_a_readable_json_object() {
        let root = temp_root();
        let storage = FileStorage::new(root.path());
        let payload = "{\"victime\":{\"nom\":\"Doe\"}}\n\ttab";
        assert!(storage.set(StorageScope::Local, "validation_data_req12", payload).is_ok());

        let raw = match fs::read_to_string(storage.local_path()) {
            Ok(raw) => raw,
            Err(error) => panic!("{error}"),
        };
        let parsed: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(parsed["validation_data_req12"], payload);
    }

    #[test]
    fn removing_last_key_deletes_store_file() {
        let root = temp_root();
        let storage = FileStorage::new(root.path());
        assert!(storage.set(StorageScope::Local, "k", "v").is_ok());
        assert!(storage.local_path().exists());

        assert!(storage.remove(StorageScope::Local, "k").is_ok());
        assert!(!storage.local_path().exists());
        assert_eq!(storage.keys(StorageScope::Local), Ok(Vec::new()));
    }

    #[test]
    fn corrupt_store_is_reported() {
        let root = temp_root();
        let storage = FileStorage::new(root.path());
        assert!(fs::write(storage.local_path(), "[1, 2").is_ok());

        let read = storage.get(StorageScope::Local, "k");
        assert!(read.is_err());
        if let Err(error) = read {
            assert_eq!(error.code, "storage.file_corrupt");
        }
    }
}
