//! Token exchange contract and the single-flight slot.
//!
//! The slot holds at most one in-flight exchange. Callers that find it
//! occupied await the same shared future instead of starting another
//! exchange, because a second exchange would present a refresh token the
//! first one already rotated.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;

use super::credentials::Credential;
use crate::error::RefreshError;

/// Raw token-exchange result as returned by the server.
///
/// Fields are optional so a structurally invalid response can be reported
/// as `MalformedRefreshResponse` rather than a decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl RefreshResponse {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: Some(refresh_token.into()),
        }
    }

    /// Validate into a complete credential.
    pub fn into_credential(self) -> Result<Credential, RefreshError> {
        match (self.access_token, self.refresh_token) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                Ok(Credential::new(access, refresh))
            }
            (access, _) if access.as_deref().map_or(true, str::is_empty) => Err(
                RefreshError::MalformedRefreshResponse("missing access token".to_string()),
            ),
            _ => Err(RefreshError::MalformedRefreshResponse(
                "missing refresh token".to_string(),
            )),
        }
    }
}

/// Exchanges a refresh token for a new access/refresh pair.
///
/// Implementations report network and server failures as
/// `RefreshTransportError` and undecodable payloads as
/// `MalformedRefreshResponse`.
pub trait TokenExchange: Send + Sync + 'static {
    fn exchange(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<RefreshResponse, RefreshError>> + Send;
}

impl<T: TokenExchange> TokenExchange for Arc<T> {
    fn exchange(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = Result<RefreshResponse, RefreshError>> + Send {
        (**self).exchange(refresh_token)
    }
}

pub(crate) type RefreshOutcome = Result<(), RefreshError>;
pub(crate) type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    id: u64,
    outcome: SharedRefresh,
}

/// Single-flight slot for the token exchange.
#[derive(Default)]
pub(crate) struct RefreshSlot {
    next_id: AtomicU64,
    in_flight: Mutex<Option<InFlight>>,
}

impl RefreshSlot {
    /// Join the in-flight refresh, or start one with `start`.
    ///
    /// `start` receives the id the new refresh must pass to [`settle`] once
    /// its side effects are applied. Returns the shared outcome and whether
    /// this call started it.
    ///
    /// [`settle`]: RefreshSlot::settle
    pub(crate) fn join_or_start<F, Fut>(&self, start: F) -> (SharedRefresh, bool)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = RefreshOutcome> + Send + 'static,
    {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(in_flight) = slot.as_ref() {
            return (in_flight.outcome.clone(), false);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let outcome = start(id).boxed().shared();
        *slot = Some(InFlight {
            id,
            outcome: outcome.clone(),
        });
        (outcome, true)
    }

    /// Release the slot held by refresh `id`.
    pub(crate) fn settle(&self, id: u64) {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|in_flight| in_flight.id == id) {
            *slot = None;
        }
    }

    pub(crate) fn current(&self) -> Option<SharedRefresh> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|in_flight| in_flight.outcome.clone())
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
