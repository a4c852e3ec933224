//! Auth Events
//!
//! Observer registry for credential lifecycle events.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Credential lifecycle event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    /// A user signed in and credentials were stored.
    SignedIn { user_id: Option<String> },
    /// Credentials were cleared by sign-out.
    SignedOut,
    /// Credentials were replaced by a successful refresh.
    TokensRefreshed { expires_at: i64 },
    /// A refresh failed and credentials were cleared.
    RefreshFailed { reason: String },
}

impl AuthEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SignedIn { .. } => "signed_in",
            Self::SignedOut => "signed_out",
            Self::TokensRefreshed { .. } => "tokens_refreshed",
            Self::RefreshFailed { .. } => "refresh_failed",
        }
    }
}

type Listener = Arc<dyn Fn(&AuthEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, Listener>,
}

/// Registry of event listeners.
///
/// Cloning the registry shares the same listener set.
#[derive(Clone, Default)]
pub struct EventRegistry {
    listeners: Arc<Mutex<Listeners>>,
}

impl EventRegistry {
    /// Create new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn register<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AuthEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, Arc::new(listener));

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Deliver `event` to every listener registered at the time of the call.
    ///
    /// Listeners are invoked outside the registry lock, so a listener may
    /// register or unsubscribe without deadlocking.
    pub fn emit(&self, event: &AuthEvent) {
        let snapshot: Vec<Listener> = self.listeners.lock().entries.values().cloned().collect();
        tracing::trace!(event = event.name(), listeners = snapshot.len(), "Emitting auth event");
        for listener in snapshot {
            listener(event);
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().entries.len()
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle that keeps a listener registered.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Remove the listener now.
    pub fn unsubscribe(self) {}

    /// Keep the listener registered for the lifetime of the registry.
    pub fn detach(mut self) {
        self.listeners = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().entries.remove(&self.id);
        }
    }
}
