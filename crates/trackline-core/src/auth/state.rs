use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use super::credentials::Credential;

/// Cached projection of the credential store.
///
/// Reads are lock-free for the flags and never touch storage. Only the
/// session manager may change it, and only right after it has written or
/// cleared the credential store.
#[derive(Debug, Default)]
pub struct SessionState {
    authenticated: AtomicBool,
    skip_auth: AtomicBool,
    access_token: RwLock<Option<Arc<str>>>,
}

/// Point-in-time copy of the session flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub is_authenticated: bool,
    pub skip_auth: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the initial state from whatever the store currently holds.
    pub fn from_credential(credential: Option<&Credential>) -> Self {
        let state = Self::new();
        if let Some(credential) = credential.filter(|c| c.is_complete()) {
            state.mark_authenticated(credential);
        }
        state
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn skip_auth(&self) -> bool {
        self.skip_auth.load(Ordering::Acquire)
    }

    /// Current access token, if authenticated
    pub fn access_token(&self) -> Option<Arc<str>> {
        self.access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            is_authenticated: self.is_authenticated(),
            skip_auth: self.skip_auth(),
        }
    }

    pub(crate) fn mark_authenticated(&self, credential: &Credential) {
        *self.access_token.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::from(credential.access_token.as_str()));
        self.authenticated.store(true, Ordering::Release);
    }

    pub(crate) fn mark_logged_out(&self) {
        self.authenticated.store(false, Ordering::Release);
        *self.access_token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn set_skip_auth(&self, skip: bool) {
        self.skip_auth.store(skip, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_missing_credential() {
        let state = SessionState::from_credential(None);
        assert!(!state.is_authenticated());
        assert!(state.access_token().is_none());
    }

    #[test]
    fn test_state_from_incomplete_credential() {
        let credential = Credential::new("a1", "");
        let state = SessionState::from_credential(Some(&credential));
        assert!(!state.is_authenticated());
    }

    #[test]
    fn test_mark_authenticated_then_logged_out() {
        let state = SessionState::new();
        state.mark_authenticated(&Credential::new("a1", "r1"));
        assert!(state.is_authenticated());
        assert_eq!(state.access_token().as_deref(), Some("a1"));

        state.mark_logged_out();
        state.set_skip_auth(true);
        assert_eq!(
            state.snapshot(),
            SessionSnapshot {
                is_authenticated: false,
                skip_auth: true
            }
        );
        assert!(state.access_token().is_none());
    }
}
