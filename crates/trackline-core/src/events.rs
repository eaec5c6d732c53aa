//! Session notification bus.
//!
//! Announces session transitions to any number of in-process subscribers.
//! Delivery is synchronous and best-effort: nothing is queued for late
//! subscribers, who should read `SessionState` on startup instead. Events
//! carry no credential; subscribers re-read the session when notified.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum SessionEventKind {
    /// A new session was established by login
    Started,
    /// The access/refresh pair was rotated by a successful refresh
    Renewed,
    /// The session is gone: logout or terminal refresh failure
    Ended,
}

impl SessionEventKind {
    /// Process-wide event name consumed by the UI shell
    pub fn event_name(&self) -> &'static str {
        match self {
            SessionEventKind::Started => "session-started",
            SessionEventKind::Renewed => "session-renewed",
            SessionEventKind::Ended => "session-ended",
        }
    }
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionEvent {
    pub kind: SessionEventKind,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(kind: SessionEventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn started() -> Self {
        Self::new(SessionEventKind::Started)
    }

    pub fn renewed() -> Self {
        Self::new(SessionEventKind::Renewed)
    }

    pub fn ended() -> Self {
        Self::new(SessionEventKind::Ended)
    }
}

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, Handler)>>,
}

impl BusInner {
    fn remove(&self, id: u64) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(handler_id, _)| *handler_id != id);
    }
}

/// Publish/subscribe channel for [`SessionEvent`]s.
///
/// Clone is cheap; clones share the same subscriber list.
#[derive(Clone, Default)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

/// Disposer returned by [`NotificationBus::subscribe`].
///
/// The handler stays registered for as long as this value is alive.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe with an async receiver instead of a callback.
    ///
    /// The receiver sees exactly the events a callback registered at the
    /// same moment would see.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event| {
            // Receiver gone; the subscription is dropped with it
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    /// Deliver `event` to every current subscriber, in subscription order.
    ///
    /// A panicking subscriber is logged and skipped; the rest still run.
    pub fn publish(&self, event: SessionEvent) {
        // Handlers run outside the lock so they may (un)subscribe re-entrantly
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        debug!(event = %event.kind, subscribers = handlers.len(), "Publishing session event");

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!(event = %event.kind, "Session event subscriber panicked");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop every subscriber. Outstanding `Subscription`s become no-ops.
    pub fn clear(&self) {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
