//! Core library for trackline.
//!
//! This crate owns the client-side session: the credential store, the cached
//! session state read by every request, the notification bus announcing
//! session transitions, the single-flight refresh coordinator, and the
//! transport hook that attaches the bearer credential to outgoing calls.
//!
//! The GraphQL transport in [`api`] is the collaborator that performs login
//! and the token exchange, and the only place that retries after a rejected
//! credential.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;

pub use api::{ApiClient, ApiError, CredentialInjector};
pub use auth::{
    Credential, CredentialStore, EncryptedFileStore, FileStore, KeyringStore, MemoryStore,
    RefreshResponse, SessionManager, SessionSnapshot, SessionState, TokenExchange,
};
pub use config::{Config, StoreKind};
pub use error::{RefreshError, SessionError};
pub use events::{NotificationBus, SessionEvent, SessionEventKind, Subscription};
