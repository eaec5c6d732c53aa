//! API client for the project-management GraphQL endpoint.
//!
//! This module provides the `ApiClient` struct for login, the refresh-token
//! exchange, and authenticated queries.

use std::time::Duration;

use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ApiError, CredentialInjector};
use crate::auth::{Credential, RefreshResponse, SessionManager, TokenExchange};
use crate::error::RefreshError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// `extensions.code` the server uses for an expired or revoked credential
const UNAUTHENTICATED_CODE: &str = "UNAUTHENTICATED";

const LOGIN_MUTATION: &str = "mutation Login($email: String!, $password: String!) { \
    login(email: $email, password: $password) { accessToken refreshToken } }";

const REFRESH_MUTATION: &str = "mutation RefreshToken($refreshToken: String!) { \
    refreshToken(refreshToken: $refreshToken) { accessToken refreshToken } }";

#[derive(Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: &'a Value,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
    #[serde(default)]
    extensions: Option<GraphqlErrorExtensions>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorExtensions {
    code: Option<String>,
}

impl GraphqlError {
    fn is_unauthenticated(&self) -> bool {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.code.as_deref())
            == Some(UNAUTHENTICATED_CODE)
    }
}

#[derive(Debug, Deserialize)]
struct LoginData {
    login: Option<RefreshResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshData {
    refresh_token: Option<RefreshResponse>,
}

/// GraphQL client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    endpoint: String,
}

impl ApiClient {
    /// Create a new API client for `endpoint`
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self::with_client(client, endpoint))
    }

    /// Use an existing reqwest client, sharing its connection pool.
    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Exchange email and password for a credential.
    ///
    /// The caller installs the result with [`SessionManager::establish`].
    pub async fn login(&self, email: &str, password: &str) -> Result<Credential, ApiError> {
        let variables = json!({ "email": email, "password": password });
        let data: LoginData = self
            .post_graphql(header::HeaderMap::new(), LOGIN_MUTATION, &variables)
            .await?;

        data.login
            .ok_or_else(|| ApiError::InvalidResponse("login field missing from response".into()))?
            .into_credential()
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Run an authenticated query or mutation.
    ///
    /// The current access token is attached via the session's injector. If
    /// the server rejects it, the session's refresh coordinator is invoked
    /// once and the request is retried once with the renewed token. A login
    /// that lands during that refresh is retried with the new credential.
    pub async fn execute<T, E>(
        &self,
        session: &SessionManager<E>,
        query: &str,
        variables: Value,
    ) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        E: TokenExchange,
    {
        let injector = session.injector();
        match self.send_authorized(&injector, query, &variables).await {
            Err(ApiError::Unauthorized) => {
                debug!("Credential rejected, requesting refresh");
                match session.request_refresh().await {
                    Ok(()) => {}
                    Err(RefreshError::Superseded) if session.is_authenticated() => {
                        debug!("Refresh superseded by a new login, retrying with its credential");
                    }
                    Err(e) => return Err(e.into()),
                }
                self.send_authorized(&injector, query, &variables).await
            }
            result => result,
        }
    }

    async fn send_authorized<T: DeserializeOwned>(
        &self,
        injector: &CredentialInjector,
        query: &str,
        variables: &Value,
    ) -> Result<T, ApiError> {
        self.post_graphql(injector.headers()?, query, variables).await
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn post_graphql<T: DeserializeOwned>(
        &self,
        headers: header::HeaderMap,
        query: &str,
        variables: &Value,
    ) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;
        let body = GraphqlRequest { query, variables };

        loop {
            let response = self
                .client
                .post(&self.endpoint)
                .header(header::ACCEPT, "application/json")
                .headers(headers.clone())
                .json(&body)
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let parsed: GraphqlResponse<T> = response.json().await.map_err(|e| {
                        ApiError::InvalidResponse(format!("Failed to parse GraphQL response: {}", e))
                    })?;
                    return Self::into_data(parsed);
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(endpoint = %self.endpoint, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    fn into_data<T>(response: GraphqlResponse<T>) -> Result<T, ApiError> {
        if response.errors.iter().any(GraphqlError::is_unauthenticated) {
            return Err(ApiError::Unauthorized);
        }

        let messages = || {
            response
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        };

        match response.data {
            Some(data) => {
                if !response.errors.is_empty() {
                    warn!(errors = %messages(), "GraphQL response carried partial errors");
                }
                Ok(data)
            }
            None if !response.errors.is_empty() => Err(ApiError::Graphql(messages())),
            None => Err(ApiError::InvalidResponse(
                "response contained neither data nor errors".into(),
            )),
        }
    }
}

impl TokenExchange for ApiClient {
    async fn exchange(&self, refresh_token: &str) -> Result<RefreshResponse, RefreshError> {
        let variables = json!({ "refreshToken": refresh_token });
        let data: RefreshData = self
            .post_graphql(header::HeaderMap::new(), REFRESH_MUTATION, &variables)
            .await
            .map_err(|e| match e {
                ApiError::InvalidResponse(msg) => RefreshError::MalformedRefreshResponse(msg),
                other => RefreshError::RefreshTransportError(other.to_string()),
            })?;

        data.refresh_token.ok_or_else(|| {
            RefreshError::MalformedRefreshResponse("refreshToken field missing from response".into())
        })
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
