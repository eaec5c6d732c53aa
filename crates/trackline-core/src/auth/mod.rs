//! Authentication module for managing the client session.
//!
//! This module provides:
//! - `CredentialStore`: durable storage for the access/refresh pair, with
//!   in-memory, file, encrypted file and OS keychain backends
//! - `SessionState`: the cached "am I authenticated" projection
//! - `TokenExchange`: the refresh-token exchange collaborator
//! - `SessionManager`: owns all of the above and coordinates refresh and logout
//!
//! At most one token exchange is in flight per `SessionManager`; concurrent
//! callers share its outcome.

pub mod credentials;
pub mod encrypted_store;
pub mod file_store;
pub mod keyring_store;
pub mod refresh;
pub mod session;
pub mod state;

pub use credentials::{Credential, CredentialStore, MemoryStore};
pub use encrypted_store::EncryptedFileStore;
pub use file_store::FileStore;
pub use keyring_store::KeyringStore;
pub use refresh::{RefreshResponse, TokenExchange};
pub use session::SessionManager;
pub use state::{SessionSnapshot, SessionState};
