//! Subscriber registry
//!
//! Every inbound event is handed to every registered handler. Handlers must
//! not rely on being called in any particular order relative to each other.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::event::SyncEvent;

/// Callback invoked for every inbound event
pub type EventHandler = Arc<dyn Fn(&SyncEvent) + Send + Sync + 'static>;

/// Callback invoked after the channel recovers from a disconnect
pub type ReconnectHandler = Arc<dyn Fn() + Send + Sync + 'static>;

/// Identifies one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscriber {
    id: SubscriberId,
    user_id: String,
    on_event: EventHandler,
    on_reconnect: Option<ReconnectHandler>,
}

/// The set of live handlers
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Vec<Subscriber>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `user_id`
    ///
    /// Re-using an id replaces the earlier registration.
    pub fn insert(
        &mut self,
        id: SubscriberId,
        user_id: &str,
        on_event: EventHandler,
        on_reconnect: Option<ReconnectHandler>,
    ) {
        self.remove(id);
        self.subscribers.push(Subscriber {
            id,
            user_id: user_id.to_string(),
            on_event,
            on_reconnect,
        });
    }

    /// Remove one handler, returning whether it was registered
    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Drop every handler that belongs to a different user
    ///
    /// Returns how many were dropped.
    pub fn retain_user(&mut self, user_id: &str) -> usize {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.user_id == user_id);
        before - self.subscribers.len()
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver `event` to every handler, returning how many completed
    ///
    /// A panicking handler is logged and skipped; the others still run.
    pub fn dispatch(&self, event: &SyncEvent) -> usize {
        self.subscribers
            .iter()
            .filter(|subscriber| {
                let ok = isolate(|| (subscriber.on_event)(event));
                if !ok {
                    warn!("Handler {} panicked on {} event", subscriber.id, event.kind());
                }
                ok
            })
            .count()
    }

    /// The reconnect callback to run after a recovery
    ///
    /// Only one runs per reconnection: the one registered most recently.
    pub fn reconnect_handler(&self) -> Option<ReconnectHandler> {
        self.subscribers
            .iter()
            .rev()
            .find_map(|s| s.on_reconnect.clone())
    }
}

/// Run a host callback so that a panic in it can't take down the session
pub(crate) fn isolate(callback: impl FnOnce()) -> bool {
    panic::catch_unwind(AssertUnwindSafe(callback)).is_ok()
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.subscribers.iter().map(|s| (s.id, &s.user_id)))
            .finish()
    }
}
