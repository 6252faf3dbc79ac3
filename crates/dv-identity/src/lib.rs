//! Request identity resolution across URL, session storage, and local storage.
//!
//! Priority is URL query parameter, then the session-scoped entry, then the
//! persistent entry. Storage failures never reach callers: they are logged and
//! the affected source is treated as empty.

pub mod location;

use dv_core::DocuResult;
use dv_core::RequestId;
use dv_storage::StoragePort;
use dv_storage::StorageScope;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::warn;

pub use location::PageLocation;
pub use location::REQUEST_ID_PARAM_ALIASES;

/// Session-scoped key holding the active request id.
pub const SESSION_REQUEST_ID_KEY: &str = "current_request_id";
/// Persistent key holding the last request id.
pub const LOCAL_REQUEST_ID_KEY: &str = "lastRequestId";

/// Where a resolved id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    Url,
    Session,
    Local,
}

impl IdentitySource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Session => "session",
            Self::Local => "local",
        }
    }
}

/// Resolved id together with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub id: RequestId,
    pub source: IdentitySource,
}

/// Tracks the active request id and keeps both storage scopes in step with it.
pub struct IdentityResolver {
    storage: Arc<dyn StoragePort>,
    current: Option<RequestId>,
}

impl IdentityResolver {
    pub fn new(storage: Arc<dyn StoragePort>) -> Self {
        Self {
            storage,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&RequestId> {
        self.current.as_ref()
    }

    /// Pure read in priority order. Does not touch in-memory state.
    pub fn resolve(&self, location: Option<&PageLocation>) -> Option<RequestId> {
        self.resolve_with_source(location)
            .map(|resolution| resolution.id)
    }

    pub fn resolve_with_source(&self, location: Option<&PageLocation>) -> Option<Resolution> {
        if let Some(id) = location.and_then(PageLocation::request_id_param) {
            return Some(Resolution {
                id,
                source: IdentitySource::Url,
            });
        }

        if let Some(id) = self.read_scope(StorageScope::Session, SESSION_REQUEST_ID_KEY) {
            return Some(Resolution {
                id,
                source: IdentitySource::Session,
            });
        }

        self.read_scope(StorageScope::Local, LOCAL_REQUEST_ID_KEY)
            .map(|id| Resolution {
                id,
                source: IdentitySource::Local,
            })
    }

    /// Initial resolution on page load. A URL-sourced id overwrites stale storage.
    pub fn initialize(&mut self, location: Option<&PageLocation>) -> Option<RequestId> {
        let resolution = self.resolve_with_source(location);

        if let Some(resolution) = &resolution {
            if resolution.source == IdentitySource::Url {
                let session = self.read_scope(StorageScope::Session, SESSION_REQUEST_ID_KEY);
                let local = self.read_scope(StorageScope::Local, LOCAL_REQUEST_ID_KEY);
                if session.as_ref() != Some(&resolution.id) || local.as_ref() != Some(&resolution.id)
                {
                    self.persist(&resolution.id);
                }
            }
            debug!(
                request_id = %resolution.id,
                source = resolution.source.as_str(),
                "request id resolved"
            );
        }

        self.current = resolution.map(|resolution| resolution.id);
        self.current.clone()
    }

    /// Applies a URL change while mounted. Returns true when the tracked id changed.
    pub fn on_location_change(&mut self, location: &PageLocation) -> bool {
        let Some(id) = location.request_id_param() else {
            return false;
        };

        if self.current.as_ref() == Some(&id) {
            return false;
        }

        info!(request_id = %id, "request id changed from URL");
        self.persist(&id);
        self.current = Some(id);
        true
    }

    /// Validates, then writes both scopes. Invalid input changes nothing.
    pub fn set(&mut self, raw: &str) -> DocuResult<RequestId> {
        let id = RequestId::parse(raw).inspect_err(|error| {
            warn!(%error, "rejected request id");
        })?;

        self.persist(&id);
        self.current = Some(id.clone());
        Ok(id)
    }

    /// Removes the id from both scopes and forgets it. Never fails.
    pub fn clear(&mut self) {
        for (scope, key) in [
            (StorageScope::Session, SESSION_REQUEST_ID_KEY),
            (StorageScope::Local, LOCAL_REQUEST_ID_KEY),
        ] {
            if let Err(error) = self.storage.remove(scope, key) {
                warn!(scope = scope.as_str(), %error, "failed to clear request id");
            }
        }
        self.current = None;
    }

    /// Fresh id; callers decide whether to `set` it.
    pub fn generate(&self) -> RequestId {
        RequestId::generate()
    }

    fn persist(&self, id: &RequestId) {
        for (scope, key) in [
            (StorageScope::Session, SESSION_REQUEST_ID_KEY),
            (StorageScope::Local, LOCAL_REQUEST_ID_KEY),
        ] {
            if let Err(error) = self.storage.set(scope, key, id.as_str()) {
                warn!(scope = scope.as_str(), %error, "failed to persist request id");
            }
        }
    }

    fn read_scope(&self, scope: StorageScope, key: &str) -> Option<RequestId> {
        match self.storage.get(scope, key) {
            Ok(value) => value.and_then(|raw| RequestId::from_untrusted(&raw)),
            Err(error) => {
                warn!(scope = scope.as_str(), %error, "failed to read request id");
                None
            }
        }
    }
}
