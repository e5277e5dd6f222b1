//! Shared charge-session polling.
//!
//! [`ChargeProvider`] runs at most one polling loop (an *epoch*) no matter
//! how many callers observe the session. Every call to
//! [`ChargeProvider::shared_updates`] registers a subscriber; the first one
//! starts an epoch, later ones join it without triggering extra fetches.
//!
//! Each iteration fetches one [`Session`](crate::session::Session) and
//! delivers it to a snapshot of the current subscribers, then sleeps for the
//! configured interval. The epoch stops on its own when a poll finds no
//! subscriber left, or when a fetch fails: the error is then delivered to
//! every subscriber as the terminal event of its stream and the registry is
//! cleared. Nothing is retried; subscribing again starts a new epoch.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::{SessionCommands, SessionFetcher};
use crate::auth::Authentication;
use crate::context::SessionContextStore;
use crate::error::ApiError;
use crate::registry::{EpochTicket, SubscriberId, SubscriptionRegistry};
use crate::updates::{SessionSink, SessionUpdates, mailbox};

/// Polling configuration for [`ChargeProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Pause between the end of one fetch and the start of the next.
    pub poll_interval: Duration,
}

impl ProviderConfig {
    /// Default pause between polls (2 seconds).
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

    /// Sets the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }
}

struct Shared<A> {
    api: A,
    registry: Arc<SubscriptionRegistry>,
    config: ProviderConfig,
}

/// Multiplexes one backend polling loop across any number of observers.
///
/// Dropping the provider cancels the running epoch; every open
/// [`SessionUpdates`] then ends with `None`.
pub struct ChargeProvider<A> {
    shared: Arc<Shared<A>>,
    context_store: Option<Arc<dyn SessionContextStore>>,
    shutdown: CancellationToken,
}

impl<A> fmt::Debug for ChargeProvider<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChargeProvider")
            .field("config", &self.shared.config)
            .field("registry", &self.shared.registry)
            .field("has_context_store", &self.context_store.is_some())
            .finish_non_exhaustive()
    }
}

impl<A> ChargeProvider<A>
where
    A: SessionFetcher + 'static,
{
    /// Creates a provider polling `api` with the default configuration.
    #[must_use]
    pub fn new(api: A) -> Self {
        Self::with_config(api, ProviderConfig::default())
    }

    /// Creates a provider polling `api` with `config`.
    #[must_use]
    pub fn with_config(api: A, config: ProviderConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                registry: Arc::new(SubscriptionRegistry::new()),
                config,
            }),
            context_store: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Attaches the store that records whether a session was started here.
    #[must_use]
    pub fn with_context_store(mut self, store: Arc<dyn SessionContextStore>) -> Self {
        self.context_store = Some(store);
        self
    }

    /// Returns the attached context store, if any.
    #[must_use]
    pub fn context_store(&self) -> Option<&Arc<dyn SessionContextStore>> {
        self.context_store.as_ref()
    }

    /// Returns the polling configuration.
    #[must_use]
    pub fn config(&self) -> ProviderConfig {
        self.shared.config
    }

    /// Returns the subscriber registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.shared.registry
    }

    /// Returns a snapshot of the registered subscriber sinks.
    pub async fn subscribers(&self) -> Vec<SessionSink> {
        self.shared.registry.subscribers().await
    }

    /// Returns `true` if at least one subscriber is registered.
    pub async fn has_subscribers(&self) -> bool {
        self.shared.registry.has_subscribers().await
    }

    /// Returns the number of registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.shared.registry.subscriber_count().await
    }

    /// Returns `true` while a polling epoch is running.
    pub async fn is_polling(&self) -> bool {
        self.shared.registry.is_polling().await
    }

    /// Subscribes to the shared session stream.
    ///
    /// Starts a polling epoch bound to `authentication` if none is running;
    /// otherwise joins the running one. Returns immediately, without waiting
    /// for the network.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn shared_updates(&self, authentication: &Authentication) -> SessionUpdates {
        let id = SubscriberId::new();
        let (sink, receiver) = mailbox();
        let updates = SessionUpdates::new(id.clone(), receiver, Arc::clone(&self.shared.registry));

        #[cfg(feature = "telemetry")]
        tracing::debug!(subscriber = %id, "subscriber added");

        if let Some(ticket) = self
            .shared
            .registry
            .join(id, sink, &self.shutdown)
            .await
        {
            tokio::spawn(run_epoch(
                Arc::clone(&self.shared),
                authentication.clone(),
                ticket,
            ));
        }

        updates
    }
}

impl<A> ChargeProvider<A>
where
    A: SessionFetcher + SessionCommands + 'static,
{
    /// Asks the backend to start charging and records the session context.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`ApiError`] unchanged; the context is left
    /// untouched on failure.
    pub async fn start_session(&self, authentication: &Authentication) -> Result<(), ApiError> {
        self.shared.api.start_session(authentication).await?;
        if let Some(store) = &self.context_store {
            store.set_session_context(true);
        }
        #[cfg(feature = "telemetry")]
        tracing::info!("charge session start requested");
        Ok(())
    }

    /// Asks the backend to stop charging.
    ///
    /// The session context stays stored until the session is observed as
    /// stopped.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`ApiError`] unchanged.
    pub async fn stop_session(&self, authentication: &Authentication) -> Result<(), ApiError> {
        self.shared.api.stop_session(authentication).await?;
        #[cfg(feature = "telemetry")]
        tracing::info!("charge session stop requested");
        Ok(())
    }
}

impl<A> Drop for ChargeProvider<A> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// One polling epoch.
async fn run_epoch<A>(shared: Arc<Shared<A>>, authentication: Authentication, ticket: EpochTicket)
where
    A: SessionFetcher,
{
    let EpochTicket { generation, token } = ticket;
    let registry = &shared.registry;

    #[cfg(feature = "telemetry")]
    tracing::debug!(generation, "polling epoch started");

    loop {
        let fetched = tokio::select! {
            biased;
            () = token.cancelled() => break,
            result = shared.api.fetch_session(&authentication) => result,
        };

        match fetched {
            Ok(session) => {
                let Some(sinks) = registry.snapshot_or_retire(generation).await else {
                    #[cfg(feature = "telemetry")]
                    tracing::debug!(generation, "no subscribers left, polling epoch stopped");
                    return;
                };
                #[cfg(feature = "telemetry")]
                tracing::trace!(
                    generation,
                    subscribers = sinks.len(),
                    status = %session.status,
                    "session delivered"
                );
                for sink in &sinks {
                    sink.send(session.clone());
                }
            }
            Err(error) => {
                let sinks = registry.drain_and_retire(generation).await;
                #[cfg(feature = "telemetry")]
                tracing::warn!(
                    generation,
                    subscribers = sinks.len(),
                    error = %error,
                    "session fetch failed, polling epoch stopped"
                );
                for sink in &sinks {
                    sink.finish(error.clone());
                }
                return;
            }
        }

        tokio::select! {
            biased;
            () = token.cancelled() => break,
            () = tokio::time::sleep(shared.config.poll_interval) => {}
        }
    }

    #[cfg(feature = "telemetry")]
    tracing::debug!(generation, "polling epoch cancelled");
    for sink in registry.drain_and_retire(generation).await {
        sink.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BoxFuture;
    use crate::context::InMemorySessionContextStore;
    use crate::error::ConnectivityError;
    use crate::session::{Session, SessionStatus};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Scriptable backend counting every call.
    #[derive(Debug)]
    struct FakeApi {
        fetches: AtomicUsize,
        starts: AtomicUsize,
        stops: AtomicUsize,
        next: Mutex<Result<Session, ApiError>>,
    }

    impl FakeApi {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicUsize::new(0),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                next: Mutex::new(Ok(charging())),
            })
        }

        fn respond_with(&self, result: Result<Session, ApiError>) {
            *self.next.lock() = result;
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl SessionFetcher for FakeApi {
        fn fetch_session<'a>(
            &'a self,
            _authentication: &'a Authentication,
        ) -> BoxFuture<'a, Result<Session, ApiError>> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                self.next.lock().clone()
            })
        }
    }

    impl SessionCommands for FakeApi {
        fn start_session<'a>(
            &'a self,
            _authentication: &'a Authentication,
        ) -> BoxFuture<'a, Result<(), ApiError>> {
            Box::pin(async move {
                self.starts.fetch_add(1, Ordering::SeqCst);
                self.next.lock().clone().map(|_| ())
            })
        }

        fn stop_session<'a>(
            &'a self,
            _authentication: &'a Authentication,
        ) -> BoxFuture<'a, Result<(), ApiError>> {
            Box::pin(async move {
                self.stops.fetch_add(1, Ordering::SeqCst);
                self.next.lock().clone().map(|_| ())
            })
        }
    }

    /// Backend whose fetches block until a permit is released.
    #[derive(Debug)]
    struct GatedApi {
        gate: Semaphore,
        fetches: AtomicUsize,
    }

    impl SessionFetcher for GatedApi {
        fn fetch_session<'a>(
            &'a self,
            _authentication: &'a Authentication,
        ) -> BoxFuture<'a, Result<Session, ApiError>> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                let permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|e| ApiError::Unknown(e.to_string()))?;
                permit.forget();
                Ok(charging())
            })
        }
    }

    fn charging() -> Session {
        Session::new("EVSE-1", SessionStatus::Charging).with_consumption(1.5)
    }

    fn auth() -> Authentication {
        Authentication::new("token")
    }

    fn provider(api: &Arc<FakeApi>) -> ChargeProvider<Arc<FakeApi>> {
        ChargeProvider::new(Arc::clone(api))
    }

    async fn wait_until_empty<A: SessionFetcher + 'static>(provider: &ChargeProvider<A>) {
        for _ in 0..50 {
            if !provider.has_subscribers().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("registry did not drain within 500ms");
    }

    #[tokio::test(start_paused = true)]
    async fn single_subscriber_polls_once_per_value() {
        let api = FakeApi::new();
        let provider = provider(&api);
        let mut updates = provider.shared_updates(&auth()).await;

        assert_eq!(updates.next().await, Some(Ok(charging())));
        assert_eq!(api.fetches(), 1);

        assert_eq!(updates.next().await, Some(Ok(charging())));
        assert_eq!(api.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fan_out_shares_one_fetch() {
        for n in [3, 10] {
            let api = FakeApi::new();
            let provider = provider(&api);
            let mut streams = Vec::new();
            for _ in 0..n {
                streams.push(provider.shared_updates(&auth()).await);
            }
            for updates in &mut streams {
                assert_eq!(updates.next().await, Some(Ok(charging())));
            }
            assert_eq!(api.fetches(), 1, "{n} subscribers");
            assert_eq!(provider.subscriber_count().await, n);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_shutdown_then_restart() {
        let api = FakeApi::new();
        let provider = provider(&api);
        let mut a = provider.shared_updates(&auth()).await;
        let mut b = provider.shared_updates(&auth()).await;
        a.next().await.unwrap().unwrap();
        b.next().await.unwrap().unwrap();
        drop(a);
        drop(b);

        wait_until_empty(&provider).await;

        // the next poll finds nobody and retires the epoch
        tokio::time::sleep(ProviderConfig::DEFAULT_POLL_INTERVAL * 2).await;
        assert!(!provider.is_polling().await);
        let fetches = api.fetches();

        let mut c = provider.shared_updates(&auth()).await;
        assert!(provider.is_polling().await);
        assert_eq!(c.next().await, Some(Ok(charging())));
        assert_eq!(api.fetches(), fetches + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_before_idle_check_reuses_epoch() {
        let api = FakeApi::new();
        let provider = provider(&api);
        let mut a = provider.shared_updates(&auth()).await;
        a.next().await.unwrap().unwrap();
        drop(a);
        wait_until_empty(&provider).await;
        assert!(provider.is_polling().await);

        let mut b = provider.shared_updates(&auth()).await;
        assert_eq!(b.next().await, Some(Ok(charging())));
        assert_eq!(api.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn join_during_fetch_receives_its_value() {
        let api = Arc::new(GatedApi {
            gate: Semaphore::new(0),
            fetches: AtomicUsize::new(0),
        });
        let provider = ChargeProvider::new(Arc::clone(&api));

        let a = provider.shared_updates(&auth()).await;
        while api.fetches.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        drop(a);
        wait_until_empty(&provider).await;
        assert!(provider.is_polling().await);

        // joins the epoch whose fetch is still in flight
        let mut b = provider.shared_updates(&auth()).await;
        api.gate.add_permits(1);

        assert_eq!(b.next().await, Some(Ok(charging())));
        assert_eq!(api.fetches.load(Ordering::SeqCst), 1);
        assert!(provider.is_polling().await);
    }

    #[tokio::test(start_paused = true)]
    async fn error_is_broadcast_to_every_subscriber() {
        let api = FakeApi::new();
        let error = ApiError::Connectivity(ConnectivityError::TimedOut);
        api.respond_with(Err(error.clone()));
        let provider = provider(&api);

        let mut streams = Vec::new();
        for _ in 0..3 {
            streams.push(provider.shared_updates(&auth()).await);
        }
        for updates in &mut streams {
            assert_eq!(updates.next().await, Some(Err(error.clone())));
            assert_eq!(updates.next().await, None);
        }
        assert_eq!(api.fetches(), 1);
        assert_eq!(provider.subscriber_count().await, 0);
        assert!(!provider.is_polling().await);
    }

    #[tokio::test(start_paused = true)]
    async fn error_then_recovery() {
        let api = FakeApi::new();
        api.respond_with(Err(ApiError::Unauthorized));
        let provider = provider(&api);

        let mut failed = provider.shared_updates(&auth()).await;
        assert_eq!(failed.next().await, Some(Err(ApiError::Unauthorized)));
        drop(failed);
        wait_until_empty(&provider).await;

        api.respond_with(Ok(charging()));
        let mut retried = provider.shared_updates(&auth()).await;
        assert_eq!(retried.next().await, Some(Ok(charging())));
        assert_eq!(api.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_provider_ends_streams() {
        let api = FakeApi::new();
        let provider = provider(&api);
        let mut updates = provider.shared_updates(&auth()).await;
        updates.next().await.unwrap().unwrap();
        drop(provider);
        assert_eq!(updates.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_poll_interval() {
        let api = FakeApi::new();
        let config = ProviderConfig::default().with_poll_interval(Duration::from_secs(30));
        let provider = ChargeProvider::with_config(Arc::clone(&api), config);
        let mut updates = provider.shared_updates(&auth()).await;
        updates.next().await.unwrap().unwrap();

        let start = tokio::time::Instant::now();
        updates.next().await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(provider.config().poll_interval, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn start_records_context_and_stop_keeps_it() {
        let api = FakeApi::new();
        let store = Arc::new(InMemorySessionContextStore::default());
        let provider = provider(&api).with_context_store(Arc::clone(&store) as Arc<dyn SessionContextStore>);

        provider.start_session(&auth()).await.unwrap();
        assert!(store.has_session_context());
        provider.stop_session(&auth()).await.unwrap();
        assert!(store.has_session_context());
        assert_eq!(api.starts.load(Ordering::SeqCst), 1);
        assert_eq!(api.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_start_leaves_context_untouched() {
        let api = FakeApi::new();
        api.respond_with(Err(ApiError::Server {
            status: 500,
            message: None,
        }));
        let store = Arc::new(InMemorySessionContextStore::default());
        let provider = provider(&api).with_context_store(Arc::clone(&store) as Arc<dyn SessionContextStore>);

        let err = provider.start_session(&auth()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!store.has_session_context());
    }
}
