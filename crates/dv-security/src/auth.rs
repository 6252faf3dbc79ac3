//! Explicitly constructed authentication session holder.

use dv_core::Clock;
use dv_core::DocuError;
use dv_core::DocuResult;
use dv_core::SystemClock;
use std::sync::Arc;
use std::sync::RwLock;

/// Signed-in user as issued by the hosted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: String,
    pub access_token: String,
    /// Epoch millis; `None` never expires.
    pub expires_at: Option<u64>,
}

impl AuthSession {
    pub fn is_expired_at(&self, now_millis: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| now_millis >= expires_at)
    }
}

/// Holds at most one session. Each instance is independent.
pub struct AuthService {
    session: RwLock<Option<AuthSession>>,
    clock: Arc<dyn Clock>,
}

impl Default for AuthService {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl AuthService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            session: RwLock::new(None),
            clock,
        }
    }

    pub fn sign_in(&self, session: AuthSession) -> DocuResult<()> {
        if session.access_token.trim().is_empty() {
            return Err(DocuError::new(
                "auth.token_missing",
                "access token must not be empty",
            ));
        }

        let mut guard = self
            .session
            .write()
            .map_err(|_| DocuError::new("auth.lock_poisoned", "auth session lock poisoned"))?;
        *guard = Some(session);
        Ok(())
    }

    pub fn sign_out(&self) {
        if let Ok(mut guard) = self.session.write() {
            *guard = None;
        }
    }

    /// Current session unless expired.
    pub fn session(&self) -> Option<AuthSession> {
        let guard = self.session.read().ok()?;
        let session = guard.as_ref()?;
        (!session.is_expired_at(self.clock.now_millis())).then(|| session.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        self.session().map(|session| session.user_id)
    }

    pub fn bearer_token(&self) -> Option<String> {
        self.session().map(|session| session.access_token)
    }
}
