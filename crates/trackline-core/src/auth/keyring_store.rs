use anyhow::{Context, Result};
use keyring::Entry;

use super::credentials::{Credential, CredentialStore};

pub const SERVICE_NAME: &str = "trackline";

/// Default keychain account holding the session
pub const DEFAULT_ACCOUNT: &str = "session";

/// Credential store in the OS keychain.
///
/// Both tokens live in one keychain entry as a JSON document, so rotation
/// is a single `set_password` call.
pub struct KeyringStore {
    service: String,
    account: String,
}

impl KeyringStore {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
            account: account.into(),
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.account).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(DEFAULT_ACCOUNT)
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self) -> Result<Option<Credential>> {
        match self.entry()?.get_password() {
            Ok(secret) => {
                let credential: Credential = serde_json::from_str(&secret)
                    .context("Failed to parse credentials from keychain")?;
                Ok(Some(credential).filter(Credential::is_complete))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve credentials from keychain"),
        }
    }

    fn set(&self, credential: &Credential) -> Result<()> {
        let secret = serde_json::to_string(credential)?;
        self.entry()?
            .set_password(&secret)
            .context("Failed to store credentials in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credentials from keychain"),
        }
    }

    fn name(&self) -> &str {
        "keyring"
    }
}
