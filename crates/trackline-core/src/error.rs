//! Error types for the session core.

use thiserror::Error;

/// Outcome of a failed refresh.
///
/// Every waiter coalesced onto the same exchange receives a clone of the same
/// value, so this type is `Clone` and carries only strings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Malformed refresh response: {0}")]
    MalformedRefreshResponse(String),

    #[error("Token exchange failed: {0}")]
    RefreshTransportError(String),

    #[error("Refresh suppressed - session was ended in this cycle")]
    SkipAuth,

    #[error("Refresh result discarded - session was ended or replaced while it was running")]
    Superseded,

    #[error("Credential store error: {0}")]
    Storage(String),
}

impl RefreshError {
    /// Short, stable label used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            RefreshError::NoRefreshToken => "no_refresh_token",
            RefreshError::MalformedRefreshResponse(_) => "malformed_response",
            RefreshError::RefreshTransportError(_) => "transport",
            RefreshError::SkipAuth => "skip_auth",
            RefreshError::Superseded => "superseded",
            RefreshError::Storage(_) => "storage",
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Credential is missing an access or refresh token")]
    IncompleteCredential,

    #[error("Credential store error: {0}")]
    Storage(String),
}
