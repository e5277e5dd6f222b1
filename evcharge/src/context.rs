//! Persisted "a charge session was started here" flag.
//!
//! The flag lets the UI show a loading state instead of flickering to
//! "absent" while the first fetch after launch is still in flight. Durable
//! storage is the embedder's concern; [`InMemorySessionContextStore`] covers
//! tests and single-process use.

use tokio::sync::watch;

/// Key-value style storage for the session-context flag.
pub trait SessionContextStore: Send + Sync {
    /// Returns the current flag.
    fn has_session_context(&self) -> bool;

    /// Overwrites the flag and notifies observers if it changed.
    fn set_session_context(&self, present: bool);

    /// Returns a receiver that observes every change of the flag.
    fn observe(&self) -> watch::Receiver<bool>;
}

/// [`SessionContextStore`] backed by a `watch` channel.
#[derive(Debug)]
pub struct InMemorySessionContextStore {
    flag: watch::Sender<bool>,
}

impl InMemorySessionContextStore {
    /// Creates a store holding `present`.
    #[must_use]
    pub fn new(present: bool) -> Self {
        Self {
            flag: watch::Sender::new(present),
        }
    }
}

impl Default for InMemorySessionContextStore {
    fn default() -> Self {
        Self::new(false)
    }
}

impl SessionContextStore for InMemorySessionContextStore {
    fn has_session_context(&self) -> bool {
        *self.flag.borrow()
    }

    fn set_session_context(&self, present: bool) {
        self.flag.send_if_modified(|current| {
            let changed = *current != present;
            *current = present;
            changed
        });
    }

    fn observe(&self) -> watch::Receiver<bool> {
        self.flag.subscribe()
    }
}
