use std::fmt;
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// An access/refresh token pair.
///
/// Both tokens are opaque bearer strings. A credential with either field empty
/// is treated as "no session" by every store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Both tokens are present
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }
}

// Tokens never reach logs through `{:?}`.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Durable storage for the session credential.
///
/// `set` replaces both tokens as one unit: a reader running concurrently with
/// a `set` sees either the old pair or the new pair, never a mix.
/// `get` returns `None` when nothing is stored or the stored pair is incomplete.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Result<Option<Credential>>;

    fn set(&self, credential: &Credential) -> Result<()>;

    fn clear(&self) -> Result<()>;

    /// Name of this storage backend.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// Process-local credential store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    credential: Mutex<Option<Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self) -> Result<Option<Credential>> {
        let guard = self.credential.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.clone().filter(Credential::is_complete))
    }

    fn set(&self, credential: &Credential) -> Result<()> {
        *self.credential.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.credential.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
