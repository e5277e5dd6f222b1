//! Subscriber registry and polling-epoch bookkeeping.
//!
//! [`SubscriptionRegistry`] is the single serialized owner of shared mutable
//! state in the polling subsystem. It maps [`SubscriberId`]s to
//! [`SessionSink`]s and also records whether a polling epoch is running, so
//! "should a new epoch start?" and "is the registry empty, so the epoch
//! should stop?" are decided under the same lock and can never interleave.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::updates::SessionSink;

/// Unique identity of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The running polling loop, if any.
#[derive(Debug)]
struct Epoch {
    generation: u64,
    token: CancellationToken,
}

/// Permission to run a freshly reserved polling epoch.
#[derive(Debug)]
pub(crate) struct EpochTicket {
    pub(crate) generation: u64,
    pub(crate) token: CancellationToken,
}

#[derive(Debug, Default)]
struct RegistryState {
    channels: HashMap<SubscriberId, SessionSink>,
    epoch: Option<Epoch>,
    next_generation: u64,
}

impl RegistryState {
    fn retire(&mut self, generation: u64) -> bool {
        match self.epoch.take() {
            Some(epoch) if epoch.generation == generation => {
                epoch.token.cancel();
                true
            }
            other => {
                self.epoch = other;
                false
            }
        }
    }
}

/// Mutation-safe mapping from subscriber identity to output channel.
///
/// Every operation runs under one async mutex, so concurrent callers observe
/// a serialized history and snapshots are never torn.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry with no active epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a subscriber, overwriting any previous entry with the same id.
    pub async fn add_subscriber(&self, id: SubscriberId, sink: SessionSink) {
        self.state.lock().await.channels.insert(id, sink);
    }

    /// Removes a subscriber. Removing an unknown id is a no-op.
    pub async fn remove_subscriber(&self, id: &SubscriberId) {
        let removed = self.state.lock().await.channels.remove(id);
        if removed.is_some() {
            #[cfg(feature = "telemetry")]
            tracing::debug!(subscriber = %id, "subscriber removed");
        }
    }

    /// Removes a subscriber without waiting. Returns `false` if the lock was
    /// contended and nothing was done.
    pub(crate) fn try_remove_subscriber(&self, id: &SubscriberId) -> bool {
        self.state.try_lock().is_ok_and(|mut state| {
            state.channels.remove(id);
            true
        })
    }

    /// Returns a snapshot of every registered sink, in no particular order.
    pub async fn subscribers(&self) -> Vec<SessionSink> {
        self.state.lock().await.channels.values().cloned().collect()
    }

    /// Returns `true` if at least one subscriber is registered.
    pub async fn has_subscribers(&self) -> bool {
        !self.state.lock().await.channels.is_empty()
    }

    /// Returns the number of registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.channels.len()
    }

    /// Returns `true` while a polling epoch is active.
    pub async fn is_polling(&self) -> bool {
        self.state.lock().await.epoch.is_some()
    }

    /// Registers a subscriber and, if no epoch is active, reserves a new one.
    ///
    /// Returns the ticket the caller must use to run the new epoch, or `None`
    /// if the subscriber joined the epoch that is already running.
    pub(crate) async fn join(
        &self,
        id: SubscriberId,
        sink: SessionSink,
        shutdown: &CancellationToken,
    ) -> Option<EpochTicket> {
        let mut state = self.state.lock().await;
        state.channels.insert(id, sink);
        if state.epoch.is_some() {
            return None;
        }
        let generation = state.next_generation;
        state.next_generation += 1;
        let token = shutdown.child_token();
        state.epoch = Some(Epoch {
            generation,
            token: token.clone(),
        });
        Some(EpochTicket { generation, token })
    }

    /// Takes the per-poll snapshot for epoch `generation`.
    ///
    /// If no subscriber is left, the epoch is retired and `None` is returned.
    /// A stale generation also gets `None`.
    pub(crate) async fn snapshot_or_retire(&self, generation: u64) -> Option<Vec<SessionSink>> {
        let mut state = self.state.lock().await;
        let current = state
            .epoch
            .as_ref()
            .is_some_and(|epoch| epoch.generation == generation);
        if !current {
            return None;
        }
        // receivers dropped outside a runtime could not unsubscribe themselves
        state.channels.retain(|_, sink| !sink.is_closed());
        if state.channels.is_empty() {
            state.retire(generation);
            return None;
        }
        Some(state.channels.values().cloned().collect())
    }

    /// Removes every subscriber and retires epoch `generation`.
    ///
    /// A stale generation leaves the registry untouched and gets an empty list.
    pub(crate) async fn drain_and_retire(&self, generation: u64) -> Vec<SessionSink> {
        let mut state = self.state.lock().await;
        if state.retire(generation) {
            state.channels.drain().map(|(_, sink)| sink).collect()
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updates::mailbox;

    fn sink() -> SessionSink {
        mailbox().0
    }

    #[tokio::test]
    async fn add_and_remove() {
        let registry = SubscriptionRegistry::new();
        let id = SubscriberId::new();
        registry.add_subscriber(id.clone(), sink()).await;
        assert!(registry.has_subscribers().await);
        assert_eq!(registry.subscribers().await.len(), 1);

        registry.remove_subscriber(&id).await;
        assert!(!registry.has_subscribers().await);
        assert!(registry.subscribers().await.is_empty());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let id = SubscriberId::new();
        registry.remove_subscriber(&id).await;
        registry.add_subscriber(id.clone(), sink()).await;
        registry.remove_subscriber(&id).await;
        registry.remove_subscriber(&id).await;
        assert_eq!(registry.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn add_overwrites_same_id() {
        let registry = SubscriptionRegistry::new();
        let id = SubscriberId::new();
        registry.add_subscriber(id.clone(), sink()).await;
        registry.add_subscriber(id, sink()).await;
        assert_eq!(registry.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_adds_are_serialized() {
        let registry = std::sync::Arc::new(SubscriptionRegistry::new());
        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let registry = std::sync::Arc::clone(&registry);
                tokio::spawn(async move {
                    registry.add_subscriber(SubscriberId::new(), sink()).await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(registry.subscriber_count().await, 50);
    }

    #[tokio::test]
    async fn only_first_join_reserves_an_epoch() {
        let registry = SubscriptionRegistry::new();
        let shutdown = CancellationToken::new();
        let first = registry.join(SubscriberId::new(), sink(), &shutdown).await;
        let second = registry.join(SubscriberId::new(), sink(), &shutdown).await;
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(registry.is_polling().await);
        assert_eq!(registry.subscriber_count().await, 2);
    }

    #[tokio::test]
    async fn empty_snapshot_retires_epoch() {
        let registry = SubscriptionRegistry::new();
        let shutdown = CancellationToken::new();
        let id = SubscriberId::new();
        let ticket = registry.join(id.clone(), sink(), &shutdown).await.unwrap();

        assert_eq!(
            registry
                .snapshot_or_retire(ticket.generation)
                .await
                .map(|s| s.len()),
            Some(1)
        );
        registry.remove_subscriber(&id).await;
        assert!(registry.snapshot_or_retire(ticket.generation).await.is_none());
        assert!(!registry.is_polling().await);

        let next = registry.join(SubscriberId::new(), sink(), &shutdown).await;
        assert!(next.is_some_and(|t| t.generation > ticket.generation));
    }

    #[tokio::test]
    async fn snapshot_prunes_closed_sinks() {
        let registry = SubscriptionRegistry::new();
        let shutdown = CancellationToken::new();
        let (closed, _receiver) = mailbox();
        let ticket = registry
            .join(SubscriberId::new(), closed.clone(), &shutdown)
            .await
            .unwrap();
        registry.add_subscriber(SubscriberId::new(), sink()).await;
        closed.close();

        let snapshot = registry.snapshot_or_retire(ticket.generation).await;
        assert_eq!(snapshot.map(|s| s.len()), Some(1));
        assert_eq!(registry.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn drain_ignores_stale_generation() {
        let registry = SubscriptionRegistry::new();
        let shutdown = CancellationToken::new();
        let ticket = registry
            .join(SubscriberId::new(), sink(), &shutdown)
            .await
            .unwrap();
        assert!(registry.drain_and_retire(ticket.generation + 1).await.is_empty());
        assert_eq!(registry.subscriber_count().await, 1);

        assert_eq!(registry.drain_and_retire(ticket.generation).await.len(), 1);
        assert_eq!(registry.subscriber_count().await, 0);
        assert!(!registry.is_polling().await);
    }

    #[tokio::test]
    async fn retiring_cancels_epoch_token() {
        let registry = SubscriptionRegistry::new();
        let shutdown = CancellationToken::new();
        let ticket = registry
            .join(SubscriberId::new(), sink(), &shutdown)
            .await
            .unwrap();
        assert!(!ticket.token.is_cancelled());
        registry.drain_and_retire(ticket.generation).await;
        assert!(ticket.token.is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_token_reaches_epoch() {
        let registry = SubscriptionRegistry::new();
        let shutdown = CancellationToken::new();
        let ticket = registry
            .join(SubscriberId::new(), sink(), &shutdown)
            .await
            .unwrap();
        shutdown.cancel();
        assert!(ticket.token.is_cancelled());
    }

    #[test]
    fn subscriber_ids_are_unique() {
        assert_ne!(SubscriberId::new(), SubscriberId::new());
        assert_eq!(SubscriberId::new().to_string().len(), 36);
    }
}
