use std::sync::Arc;

use reqwest::{header, RequestBuilder};

use super::ApiError;
use crate::auth::SessionState;

/// Attaches `Authorization: Bearer <access token>` to outgoing requests.
///
/// Reads the session state only. Never refreshes; a rejected credential is
/// handled by whoever sees the response.
#[derive(Debug, Clone)]
pub struct CredentialInjector {
    state: Arc<SessionState>,
}

impl CredentialInjector {
    pub fn new(state: Arc<SessionState>) -> Self {
        Self { state }
    }

    /// Authorization headers for the current session; empty when logged out.
    pub fn headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if !self.state.is_authenticated() {
            return Ok(headers);
        }
        if let Some(token) = self.state.access_token() {
            let mut value = header::HeaderValue::from_str(&format!("Bearer {}", token))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    pub fn apply(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        Ok(request.headers(self.headers()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credential;

    #[test]
    fn test_injects_bearer_when_authenticated() {
        let state = Arc::new(SessionState::from_credential(Some(&Credential::new(
            "a1", "r1",
        ))));
        let headers = CredentialInjector::new(state).headers().unwrap();
        assert_eq!(headers[header::AUTHORIZATION], "Bearer a1");
        assert!(headers[header::AUTHORIZATION].is_sensitive());
    }

    #[test]
    fn test_no_header_when_logged_out() {
        let state = Arc::new(SessionState::new());
        let headers = CredentialInjector::new(state).headers().unwrap();
        assert!(headers.is_empty());
    }

    #[test]
    fn test_follows_state_changes() {
        let state = Arc::new(SessionState::from_credential(Some(&Credential::new(
            "a1", "r1",
        ))));
        let injector = CredentialInjector::new(Arc::clone(&state));

        state.mark_authenticated(&Credential::new("a2", "r2"));
        assert_eq!(injector.headers().unwrap()[header::AUTHORIZATION], "Bearer a2");

        state.mark_logged_out();
        assert!(injector.headers().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_token_with_invalid_header_bytes() {
        let state = Arc::new(SessionState::from_credential(Some(&Credential::new(
            "bad\ntoken",
            "r1",
        ))));
        let err = CredentialInjector::new(state).headers().unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentialHeader(_)));
    }

    #[test]
    fn test_apply_sets_header_on_request() {
        let state = Arc::new(SessionState::from_credential(Some(&Credential::new(
            "a1", "r1",
        ))));
        let request = CredentialInjector::new(state)
            .apply(reqwest::Client::new().get("http://localhost/graphql"))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.headers()[header::AUTHORIZATION], "Bearer a1");
    }
}
