//! GraphQL transport for the project-management API.
//!
//! This module provides the `ApiClient` used for login, the refresh-token
//! exchange, and authenticated queries, plus the `CredentialInjector` that
//! attaches the bearer token to outgoing requests.
//!
//! Retry-after-rejection lives only in `ApiClient::execute`: one refresh
//! through the session manager, then one retry.

pub mod client;
pub mod error;
pub mod injector;

pub use client::ApiClient;
pub use error::ApiError;
pub use injector::CredentialInjector;
