//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the GraphQL endpoint, the credential store backend and the
//! last used login email.
//!
//! Configuration is stored at `~/.config/trackline/config.json`. Environment
//! variables override the file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{CredentialStore, EncryptedFileStore, FileStore, KeyringStore, MemoryStore};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "trackline";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_API_URL: &str = "http://localhost:4000/graphql";

pub const ENV_API_URL: &str = "TRACKLINE_API_URL";
pub const ENV_STORE: &str = "TRACKLINE_STORE";
pub const ENV_STORE_PASSPHRASE: &str = "TRACKLINE_STORE_PASSPHRASE";

/// Where the session credential is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    File,
    Encrypted,
    Keyring,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "file" => Ok(StoreKind::File),
            "encrypted" => Ok(StoreKind::Encrypted),
            "keyring" => Ok(StoreKind::Keyring),
            other => bail!(
                "Unknown credential store '{}' (expected memory, file, encrypted or keyring)",
                other
            ),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreKind::Memory => "memory",
            StoreKind::File => "file",
            StoreKind::Encrypted => "encrypted",
            StoreKind::Keyring => "keyring",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_url: Option<String>,
    #[serde(default)]
    pub store: StoreKind,
    pub last_email: Option<String>,
    /// Passphrase for the encrypted store. Only ever read from the
    /// environment, never written to the config file.
    #[serde(skip)]
    pub store_passphrase: Option<String>,
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api_url = Some(url);
        }
        if let Some(store) = lookup(ENV_STORE).filter(|v| !v.trim().is_empty()) {
            self.store = store.parse()?;
        }
        if let Some(passphrase) = lookup(ENV_STORE_PASSPHRASE).filter(|v| !v.is_empty()) {
            self.store_passphrase = Some(passphrase);
        }
        Ok(())
    }

    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir =
            dirs::cache_dir().ok_or_else(|| anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Directory for rolling log files
    pub fn log_dir() -> Result<PathBuf> {
        Ok(Self::cache_dir()?.join("logs"))
    }

    /// Open the configured credential store, keeping file-backed stores in the cache directory.
    pub fn open_store(&self) -> Result<Arc<dyn CredentialStore>> {
        self.open_store_in(&Self::cache_dir()?)
    }

    pub fn open_store_in(&self, dir: &Path) -> Result<Arc<dyn CredentialStore>> {
        let store: Arc<dyn CredentialStore> = match self.store {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::File => Arc::new(FileStore::in_dir(dir)),
            StoreKind::Encrypted => {
                let passphrase = self.store_passphrase.clone().ok_or_else(|| {
                    anyhow!("{} must be set to use the encrypted store", ENV_STORE_PASSPHRASE)
                })?;
                Arc::new(EncryptedFileStore::in_dir(dir, passphrase))
            }
            StoreKind::Keyring => Arc::new(KeyringStore::default()),
        };
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_url(), DEFAULT_API_URL);
        assert_eq!(config.store, StoreKind::File);
    }

    #[test]
    fn test_store_kind_parse() {
        assert_eq!("Keyring".parse::<StoreKind>().unwrap(), StoreKind::Keyring);
        assert_eq!(" memory ".parse::<StoreKind>().unwrap(), StoreKind::Memory);
        assert!("redis".parse::<StoreKind>().is_err());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config {
            api_url: Some("https://file.example/graphql".into()),
            ..Config::default()
        };
        config
            .apply_overrides(lookup(&[
                (ENV_API_URL, "https://env.example/graphql"),
                (ENV_STORE, "encrypted"),
                (ENV_STORE_PASSPHRASE, "s3cret"),
            ]))
            .unwrap();

        assert_eq!(config.api_url(), "https://env.example/graphql");
        assert_eq!(config.store, StoreKind::Encrypted);
        assert_eq!(config.store_passphrase.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_invalid_store_override_is_an_error() {
        let mut config = Config::default();
        assert!(config
            .apply_overrides(lookup(&[(ENV_STORE, "floppy")]))
            .is_err());
    }

    #[test]
    fn test_save_and_load_skip_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            api_url: Some("https://api.example/graphql".into()),
            store: StoreKind::Keyring,
            last_email: Some("ada@example.com".into()),
            store_passphrase: Some("never-persisted".into()),
        };
        config.save_to(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("never-persisted"));

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.store, StoreKind::Keyring);
        assert_eq!(loaded.last_email.as_deref(), Some("ada@example.com"));
        assert!(loaded.store_passphrase.is_none());
    }

    #[test]
    fn test_load_missing_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert!(config.api_url.is_none());
    }

    #[test]
    fn test_open_store_selects_backend() {
        let dir = tempfile::tempdir().unwrap();

        let file = Config::default().open_store_in(dir.path()).unwrap();
        assert_eq!(file.name(), "file");

        let encrypted = Config {
            store: StoreKind::Encrypted,
            ..Config::default()
        };
        assert!(encrypted.open_store_in(dir.path()).is_err());

        let encrypted = Config {
            store: StoreKind::Encrypted,
            store_passphrase: Some("pw".into()),
            ..Config::default()
        };
        assert_eq!(encrypted.open_store_in(dir.path()).unwrap().name(), "encrypted");
    }
}
