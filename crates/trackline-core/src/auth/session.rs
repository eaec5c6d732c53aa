//! Session manager.
//!
//! `SessionManager` owns the credential store, the cached session state, the
//! notification bus and the refresh slot. It is the only writer of the store
//! and the state; everything else reads.
//!
//! Writers (refresh commit, logout, login, reload) serialize on one lock and
//! publish their event only after releasing it, so a subscriber reacting to
//! `session-ended` always observes an already-cleared store. Each logout or
//! login bumps a generation counter; a refresh that started under an older
//! generation discards its result instead of resurrecting the session.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::credentials::{Credential, CredentialStore};
use super::refresh::{RefreshOutcome, RefreshSlot, TokenExchange};
use super::state::{SessionSnapshot, SessionState};
use crate::api::CredentialInjector;
use crate::error::{RefreshError, SessionError};
use crate::events::{NotificationBus, SessionEvent, SessionEventKind, Subscription};

struct Inner<E> {
    store: Arc<dyn CredentialStore>,
    state: Arc<SessionState>,
    bus: NotificationBus,
    exchange: E,
    refresh: RefreshSlot,
    generation: AtomicU64,
    writer: Mutex<()>,
}

/// Owns the client session.
///
/// Clone is cheap and clones share the same session; hand clones to
/// collaborators instead of reaching for a global.
pub struct SessionManager<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for SessionManager<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: TokenExchange> SessionManager<E> {
    /// Create a manager and derive the initial state from `store`.
    ///
    /// An unreadable store is logged and treated as "no session".
    pub fn new(store: Arc<dyn CredentialStore>, exchange: E) -> Self {
        let credential = match store.get() {
            Ok(credential) => credential,
            Err(e) => {
                warn!(store = store.name(), error = %e, "Failed to load stored credentials");
                None
            }
        };
        let state = SessionState::from_credential(credential.as_ref());
        debug!(
            store = store.name(),
            authenticated = state.is_authenticated(),
            "Session manager initialized"
        );

        Self {
            inner: Arc::new(Inner {
                store,
                state: Arc::new(state),
                bus: NotificationBus::new(),
                exchange,
                refresh: RefreshSlot::default(),
                generation: AtomicU64::new(0),
                writer: Mutex::new(()),
            }),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.is_authenticated()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.snapshot()
    }

    pub fn state(&self) -> &SessionState {
        &self.inner.state
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.inner.bus
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(handler)
    }

    /// Request hook that attaches the current access token.
    pub fn injector(&self) -> CredentialInjector {
        CredentialInjector::new(Arc::clone(&self.inner.state))
    }

    pub fn store_name(&self) -> &str {
        self.inner.store.name()
    }

    pub fn refresh_in_flight(&self) -> bool {
        self.inner.refresh.is_in_flight()
    }

    /// Install the credential obtained from a successful login.
    pub fn establish(&self, credential: Credential) -> Result<(), SessionError> {
        if !credential.is_complete() {
            return Err(SessionError::IncompleteCredential);
        }

        {
            let _writer = self.inner.lock_writer();
            self.inner
                .store
                .set(&credential)
                .map_err(|e| SessionError::Storage(format!("{:#}", e)))?;
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
            self.inner.state.mark_authenticated(&credential);
            self.inner.state.set_skip_auth(false);
        }

        info!(store = self.inner.store.name(), "Session established");
        self.inner.bus.publish(SessionEvent::started());
        Ok(())
    }

    /// End the session.
    ///
    /// Takes effect immediately, even while a refresh is running; that
    /// refresh's result is discarded when it arrives. Returns whether an
    /// authenticated session was actually ended. `session-ended` is published
    /// only in that case.
    pub fn logout(&self) -> bool {
        let ended = {
            let _writer = self.inner.lock_writer();
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
            let was_authenticated = self.inner.state.is_authenticated();
            self.inner.end_locked();
            was_authenticated
        };

        if self.inner.refresh.is_in_flight() {
            info!("Logout while a refresh is in flight; its result will be discarded");
        }

        if ended {
            info!("Session ended by logout");
            self.inner.bus.publish(SessionEvent::ended());
        } else {
            debug!("Logout requested with no active session");
        }
        ended
    }

    /// Re-derive the session state from the credential store.
    ///
    /// Picks up changes written by another process sharing the store. A
    /// session that disappeared from storage is ended and announced.
    pub fn reload(&self) -> bool {
        let ended = {
            let _writer = self.inner.lock_writer();
            let was_authenticated = self.inner.state.is_authenticated();
            let credential = match self.inner.store.get() {
                Ok(credential) => credential,
                Err(e) => {
                    warn!(store = self.inner.store.name(), error = %e, "Failed to reload credentials");
                    None
                }
            };

            match credential {
                Some(credential) => {
                    if !was_authenticated {
                        // Another process logged in; treat it like a login here
                        self.inner.generation.fetch_add(1, Ordering::AcqRel);
                        self.inner.state.set_skip_auth(false);
                    }
                    self.inner.state.mark_authenticated(&credential);
                    false
                }
                None => {
                    if was_authenticated {
                        self.inner.generation.fetch_add(1, Ordering::AcqRel);
                    }
                    self.inner.state.mark_logged_out();
                    was_authenticated
                }
            }
        };

        if ended {
            info!("Stored session disappeared, ending session");
            self.inner.bus.publish(SessionEvent::ended());
        }
        self.is_authenticated()
    }

    /// Exchange the stored refresh token for a new pair.
    ///
    /// Concurrent callers share one exchange and its outcome. By the time
    /// this returns, the store, the session state and the published event
    /// already reflect the outcome. Failure always leaves the session ended;
    /// nothing is retried automatically.
    pub async fn request_refresh(&self) -> Result<(), RefreshError> {
        if self.inner.state.skip_auth() {
            debug!("Refresh requested after session end, suppressing");
            self.inner.suppress_refresh();
            return Err(RefreshError::SkipAuth);
        }

        let (outcome, started) = self.inner.refresh.join_or_start(|id| {
            let (generation, refresh_token) = self.inner.load_refresh_token();
            let inner = Arc::clone(&self.inner);
            let task = tokio::spawn(async move {
                let outcome = match refresh_token {
                    Ok(refresh_token) => {
                        let result = AssertUnwindSafe(inner.exchange_credential(&refresh_token))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                Err(RefreshError::RefreshTransportError(
                                    "token exchange panicked".to_string(),
                                ))
                            });
                        inner.commit(generation, result)
                    }
                    // Ended between the check above and the store read
                    Err(RefreshError::SkipAuth) => Err(RefreshError::SkipAuth),
                    Err(err) => inner.commit(generation, Err(err)),
                };
                inner.refresh.settle(id);
                outcome
            });

            async move {
                task.await.unwrap_or_else(|e| {
                    Err(RefreshError::RefreshTransportError(format!(
                        "refresh task failed: {}",
                        e
                    )))
                })
            }
        });

        if started {
            debug!("Started token refresh");
        } else {
            debug!("Joining in-flight token refresh");
        }
        outcome.await
    }

    /// Wait for any in-flight refresh to settle, then drop all subscribers.
    pub async fn shutdown(self) {
        if let Some(in_flight) = self.inner.refresh.current() {
            let _ = in_flight.await;
        }
        self.inner.bus.clear();
        debug!("Session manager shut down");
    }
}

impl<E: TokenExchange> Inner<E> {
    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the refresh token and the generation it belongs to, under the
    /// writer lock.
    fn load_refresh_token(&self) -> (u64, Result<String, RefreshError>) {
        let _writer = self.lock_writer();
        let generation = self.generation.load(Ordering::Acquire);
        if self.state.skip_auth() {
            return (generation, Err(RefreshError::SkipAuth));
        }

        let refresh_token = match self.store.get() {
            Ok(Some(credential)) => Ok(credential.refresh_token),
            Ok(None) => Err(RefreshError::NoRefreshToken),
            Err(e) => {
                warn!(store = self.store.name(), error = %e, "Failed to read credentials for refresh");
                Err(RefreshError::Storage(format!("{:#}", e)))
            }
        };
        (generation, refresh_token)
    }

    async fn exchange_credential(&self, refresh_token: &str) -> Result<Credential, RefreshError> {
        self.exchange
            .exchange(refresh_token)
            .await?
            .into_credential()
    }

    /// Apply a finished exchange, unless the session changed underneath it.
    fn commit(&self, generation: u64, result: Result<Credential, RefreshError>) -> RefreshOutcome {
        let (outcome, event) = {
            let _writer = self.lock_writer();
            if self.generation.load(Ordering::Acquire) != generation {
                info!("Discarding refresh result, session changed while the exchange was running");
                return Err(RefreshError::Superseded);
            }

            let stored = result.and_then(|credential| {
                self.store
                    .set(&credential)
                    .map_err(|e| RefreshError::Storage(format!("{:#}", e)))?;
                Ok(credential)
            });

            match stored {
                Ok(credential) => {
                    self.state.mark_authenticated(&credential);
                    (Ok(()), SessionEventKind::Renewed)
                }
                Err(err) => {
                    self.end_locked();
                    (Err(err), SessionEventKind::Ended)
                }
            }
        };

        match &outcome {
            Ok(()) => info!("Session renewed"),
            Err(err @ RefreshError::MalformedRefreshResponse(_)) => {
                error!(reason = err.kind(), error = %err, "Refresh failed, ending session");
            }
            Err(err) => warn!(reason = err.kind(), error = %err, "Refresh failed, ending session"),
        }

        self.bus.publish(SessionEvent::new(event));
        outcome
    }

    /// Short-circuit for refresh requests arriving after the session ended.
    ///
    /// Enforces the logged-out state without an exchange. The end of the
    /// session was already announced, so nothing is published unless a
    /// session was somehow still live.
    fn suppress_refresh(&self) {
        let ended = {
            let _writer = self.lock_writer();
            let was_authenticated = self.state.is_authenticated();
            self.end_locked();
            was_authenticated
        };
        if ended {
            self.bus.publish(SessionEvent::ended());
        }
    }

    /// Clear storage and mark logged out. Caller holds the writer lock.
    fn end_locked(&self) {
        if let Err(e) = self.store.clear() {
            error!(store = self.store.name(), error = %e, "Failed to clear stored credentials");
        }
        self.state.mark_logged_out();
        self.state.set_skip_auth(true);
    }
}

impl<E> fmt::Debug for SessionManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.inner.store.name())
            .field("state", &self.inner.state.snapshot())
            .field("refresh_in_flight", &self.inner.refresh.is_in_flight())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
