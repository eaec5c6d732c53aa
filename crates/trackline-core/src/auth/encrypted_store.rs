//! Passphrase-encrypted credential file.
//!
//! The credential pair is serialized to JSON, sealed with ChaCha20-Poly1305
//! and written as a single envelope. The key is derived from a passphrase
//! with Argon2id and a fresh random salt on every write; the KDF parameters
//! travel in the envelope so older files stay readable if the defaults change.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::credentials::{Credential, CredentialStore};
use super::file_store::write_atomic;

/// Encrypted session file name in the cache directory
pub const ENCRYPTED_SESSION_FILE: &str = "session.enc.json";

const ENVELOPE_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u8,
    m_cost: u32,
    t_cost: u32,
    p_cost: u32,
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

pub struct EncryptedFileStore {
    path: PathBuf,
    passphrase: String,
    params: Params,
}

impl EncryptedFileStore {
    pub fn new(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            passphrase: passphrase.into(),
            params: Params::default(),
        }
    }

    pub fn in_dir(dir: impl AsRef<Path>, passphrase: impl Into<String>) -> Self {
        Self::new(dir.as_ref().join(ENCRYPTED_SESSION_FILE), passphrase)
    }

    /// Override the Argon2 cost parameters used for new writes.
    pub fn with_kdf_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn derive_key(&self, salt: &[u8], params: Params) -> Result<[u8; KEY_LEN]> {
        let mut key = [0u8; KEY_LEN];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| anyhow!("Failed to derive credential key: {}", e))?;
        Ok(key)
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Envelope> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        let key = self.derive_key(&salt, self.params.clone())?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| anyhow!("Failed to encrypt credentials"))?;

        Ok(Envelope {
            version: ENVELOPE_VERSION,
            m_cost: self.params.m_cost(),
            t_cost: self.params.t_cost(),
            p_cost: self.params.p_cost(),
            salt: salt.to_vec(),
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    fn open(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        if envelope.version != ENVELOPE_VERSION {
            bail!("Unsupported credential envelope version {}", envelope.version);
        }
        if envelope.nonce.len() != NONCE_LEN {
            bail!("Credential envelope has a malformed nonce");
        }

        let params = Params::new(envelope.m_cost, envelope.t_cost, envelope.p_cost, Some(KEY_LEN))
            .map_err(|e| anyhow!("Invalid KDF parameters in credential envelope: {}", e))?;
        let key = self.derive_key(&envelope.salt, params)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
            .map_err(|_| anyhow!("Failed to decrypt credentials - wrong passphrase or corrupt file"))
    }
}

impl CredentialStore for EncryptedFileStore {
    fn get(&self) -> Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read encrypted session file")?;
        let envelope: Envelope = serde_json::from_str(&contents)
            .context("Failed to parse encrypted session file")?;
        let plaintext = self.open(&envelope)?;
        let credential: Credential = serde_json::from_slice(&plaintext)
            .context("Failed to parse decrypted credentials")?;
        Ok(Some(credential).filter(Credential::is_complete))
    }

    fn set(&self, credential: &Credential) -> Result<()> {
        let plaintext = serde_json::to_vec(credential)?;
        let envelope = self.seal(&plaintext)?;
        let contents = serde_json::to_string(&envelope)?;
        write_atomic(&self.path, contents.as_bytes())?;
        debug!(path = %self.path.display(), "Encrypted session saved");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove encrypted session file"),
        }
    }

    fn name(&self) -> &str {
        "encrypted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cheap KDF settings so tests don't spend seconds in Argon2
    fn fast_params() -> Params {
        Params::new(64, 1, 1, Some(KEY_LEN)).unwrap()
    }

    fn store(dir: &Path, passphrase: &str) -> EncryptedFileStore {
        EncryptedFileStore::in_dir(dir, passphrase).with_kdf_params(fast_params())
    }

    #[test]
    fn test_encrypted_store_reads_back_latest_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), "correct horse");

        assert!(store.get().unwrap().is_none());
        store.set(&Credential::new("a1", "r1")).unwrap();
        store.set(&Credential::new("a2", "r2")).unwrap();

        assert_eq!(store.get().unwrap(), Some(Credential::new("a2", "r2")));
    }

    #[test]
    fn test_encrypted_store_does_not_leak_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), "correct horse");
        store.set(&Credential::new("visible-access", "visible-refresh")).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("visible-access"));
        assert!(!raw.contains("visible-refresh"));
    }

    #[test]
    fn test_encrypted_store_wrong_passphrase_fails() {
        let dir = tempfile::tempdir().unwrap();
        store(dir.path(), "correct horse")
            .set(&Credential::new("a1", "r1"))
            .unwrap();

        let err = store(dir.path(), "battery staple").get().unwrap_err();
        assert!(err.to_string().contains("wrong passphrase"));
    }

    #[test]
    fn test_encrypted_store_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), "pw");
        store.set(&Credential::new("a1", "r1")).unwrap();
        store.clear().unwrap();
        assert!(store.get().unwrap().is_none());
        store.clear().unwrap();
    }
}
