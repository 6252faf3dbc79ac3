//! Storage port over session and local scopes, with payload persistence.

pub mod file;
pub mod memory;
pub mod payload;

use dv_core::DocuResult;

pub use file::FileStorage;
pub use file::LOCAL_STORE_FILE;
pub use memory::MemoryStorage;
pub use payload::DEFAULT_PAYLOAD_PREFIX;
pub use payload::PAYLOAD_TTL;
pub use payload::PayloadStore;
pub use payload::StoredPayload;

/// Lifetime class of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StorageScope {
    /// Lives as long as the current session.
    Session,
    /// Survives restarts.
    Local,
}

impl StorageScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Local => "local",
        }
    }
}

/// Key/value access injected wherever browser-style storage is needed.
///
/// Implementations use interior mutability so one instance can be shared
/// behind an `Arc` by the identity resolver and the strategies.
pub trait StoragePort: Send + Sync {
    fn get(&self, scope: StorageScope, key: &str) -> DocuResult<Option<String>>;
    fn set(&self, scope: StorageScope, key: &str, value: &str) -> DocuResult<()>;
    fn remove(&self, scope: StorageScope, key: &str) -> DocuResult<()>;
    fn keys(&self, scope: StorageScope) -> DocuResult<Vec<String>>;

    /// Cheap reachability probe.
    fn is_available(&self, scope: StorageScope) -> bool {
        self.keys(scope).is_ok()
    }
}
