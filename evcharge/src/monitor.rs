//! Live [`SessionState`] derived from the shared session stream.
//!
//! A [`SessionMonitor`] owns one subscription to a [`ChargeProvider`] and
//! re-runs [`reduce`](crate::state::reduce) whenever a session, an error or
//! the stored session-context flag changes. Consumers read the result from a
//! `watch` channel, so they only ever see the latest state.

use std::sync::Arc;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::api::SessionFetcher;
use crate::auth::Authentication;
use crate::provider::ChargeProvider;
use crate::session::SessionStatus;
use crate::state::{SessionInputs, SessionState};

/// Background task publishing the derived [`SessionState`].
///
/// After a terminal error the monitor stays in [`SessionState::Error`] until
/// [`SessionMonitor::retry`] is called. Dropping the monitor stops the task
/// and releases its subscription.
#[derive(Debug)]
pub struct SessionMonitor {
    state: watch::Receiver<SessionState>,
    retry: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SessionMonitor {
    /// Spawns a monitor observing `provider` with `authentication`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn<A>(provider: Arc<ChargeProvider<A>>, authentication: Authentication) -> Self
    where
        A: SessionFetcher + 'static,
    {
        let stored = provider
            .context_store()
            .is_some_and(|store| store.has_session_context());
        let initial = SessionInputs {
            context_stored: stored,
            ..SessionInputs::default()
        };
        let (tx, rx) = watch::channel(initial.state());
        let retry = Arc::new(Notify::new());
        let task = tokio::spawn(run_monitor(
            provider,
            authentication,
            initial,
            tx,
            Arc::clone(&retry),
        ));
        Self {
            state: rx,
            retry,
            task,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Returns a new receiver observing every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Waits for the next state change and returns the new state.
    ///
    /// Returns `None` once the monitor task has ended.
    pub async fn changed(&mut self) -> Option<SessionState> {
        self.state.changed().await.ok()?;
        Some(self.state.borrow_and_update().clone())
    }

    /// Discards a failed subscription and subscribes again.
    ///
    /// Has no effect unless the monitor is in [`SessionState::Error`]. The
    /// monitor also resubscribes on its own when the context store reports a
    /// newly stored session.
    pub fn retry(&self) {
        self.retry.notify_waiters();
    }

    /// Stops the monitor task.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn publish(tx: &watch::Sender<SessionState>, inputs: &SessionInputs) {
    let next = inputs.state();
    tx.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            #[cfg(feature = "telemetry")]
            tracing::debug!(state = ?next, "session state changed");
            *current = next;
            true
        }
    });
}

/// Resolves with the new flag value on every change; never resolves without
/// a store.
async fn context_changed(context: &mut Option<watch::Receiver<bool>>) -> bool {
    match context.as_mut() {
        Some(rx) => {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
            *rx.borrow_and_update()
        }
        None => std::future::pending().await,
    }
}

async fn run_monitor<A>(
    provider: Arc<ChargeProvider<A>>,
    authentication: Authentication,
    mut inputs: SessionInputs,
    tx: watch::Sender<SessionState>,
    retry: Arc<Notify>,
) where
    A: SessionFetcher + 'static,
{
    let mut context = provider.context_store().map(|store| store.observe());

    loop {
        inputs.loading = true;
        inputs.error = None;
        publish(&tx, &inputs);

        let mut updates = provider.shared_updates(&authentication).await;
        loop {
            tokio::select! {
                item = updates.next() => match item {
                    Some(Ok(session)) => {
                        if session.status == SessionStatus::Stopped {
                            if let Some(store) = provider.context_store() {
                                store.set_session_context(false);
                            }
                        }
                        inputs.loading = false;
                        inputs.session = Some(session);
                    }
                    Some(Err(error)) => {
                        inputs.loading = false;
                        inputs.session = None;
                        inputs.error = Some(error);
                        break;
                    }
                    None => {
                        inputs.loading = false;
                        publish(&tx, &inputs);
                        return;
                    }
                },
                stored = context_changed(&mut context) => {
                    inputs.context_stored = stored;
                }
            }
            publish(&tx, &inputs);
        }
        drop(updates);

        let notified = retry.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        publish(&tx, &inputs);
        // a session started elsewhere also ends the wait
        loop {
            tokio::select! {
                () = notified.as_mut() => break,
                stored = context_changed(&mut context) => {
                    inputs.context_stored = stored;
                    if stored {
                        break;
                    }
                }
            }
        }

        #[cfg(feature = "telemetry")]
        tracing::debug!("retrying session subscription");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::BoxFuture;
    use crate::context::{InMemorySessionContextStore, SessionContextStore};
    use crate::error::ApiError;
    use crate::session::Session;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted results, repeating the last one forever.
    #[derive(Debug)]
    struct Script(Mutex<VecDeque<Result<Session, ApiError>>>);

    impl Script {
        fn new(results: Vec<Result<Session, ApiError>>) -> Self {
            Self(Mutex::new(results.into()))
        }

        fn replace(&self, result: Result<Session, ApiError>) {
            let mut queue = self.0.lock();
            queue.clear();
            queue.push_back(result);
        }
    }

    impl SessionFetcher for Script {
        fn fetch_session<'a>(
            &'a self,
            _authentication: &'a Authentication,
        ) -> BoxFuture<'a, Result<Session, ApiError>> {
            Box::pin(async move {
                let mut queue = self.0.lock();
                if queue.len() > 1 {
                    queue.pop_front().unwrap_or(Err(ApiError::Unknown("empty".into())))
                } else {
                    queue
                        .front()
                        .cloned()
                        .unwrap_or(Err(ApiError::Unknown("empty".into())))
                }
            })
        }
    }

    fn session(status: SessionStatus) -> Session {
        Session::new("EVSE-2", status)
    }

    async fn wait_for(monitor: &mut SessionMonitor, expected: &SessionState) {
        let mut current = monitor.state();
        while current != *expected {
            current = monitor.changed().await.expect("monitor ended");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn starts_loading_then_follows_session() {
        let script = Arc::new(Script::new(vec![
            Ok(session(SessionStatus::Started)),
            Ok(session(SessionStatus::Charging)),
        ]));
        let provider = Arc::new(ChargeProvider::new(Arc::clone(&script)));
        let mut monitor = SessionMonitor::spawn(provider, Authentication::new("t"));

        wait_for(&mut monitor, &SessionState::Started(session(SessionStatus::Started))).await;
        wait_for(&mut monitor, &SessionState::Charging(session(SessionStatus::Charging))).await;
    }

    #[tokio::test]
    async fn stored_context_starts_in_loading() {
        let script = Arc::new(Script::new(vec![Ok(session(SessionStatus::Charging))]));
        let store: Arc<dyn SessionContextStore> = Arc::new(InMemorySessionContextStore::new(true));
        let provider =
            Arc::new(ChargeProvider::new(Arc::clone(&script)).with_context_store(store));
        let monitor = SessionMonitor::spawn(provider, Authentication::new("t"));
        assert_eq!(monitor.state(), SessionState::Loading);
    }

    #[tokio::test(start_paused = true)]
    async fn error_waits_for_retry() {
        let script = Arc::new(Script::new(vec![Err(ApiError::Unauthorized)]));
        let provider = Arc::new(ChargeProvider::new(Arc::clone(&script)));
        let mut monitor = SessionMonitor::spawn(Arc::clone(&provider), Authentication::new("t"));

        wait_for(&mut monitor, &SessionState::Error(ApiError::Unauthorized)).await;
        assert!(!provider.is_polling().await);

        script.replace(Ok(session(SessionStatus::Charging)));
        monitor.retry();
        wait_for(&mut monitor, &SessionState::Charging(session(SessionStatus::Charging))).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_session_clears_context() {
        let script = Arc::new(Script::new(vec![Ok(session(SessionStatus::Stopped))]));
        let store = Arc::new(InMemorySessionContextStore::new(true));
        let provider = Arc::new(
            ChargeProvider::new(Arc::clone(&script))
                .with_context_store(Arc::clone(&store) as Arc<dyn SessionContextStore>),
        );
        let mut monitor = SessionMonitor::spawn(provider, Authentication::new("t"));

        wait_for(&mut monitor, &SessionState::Stopped(session(SessionStatus::Stopped))).await;
        assert!(!store.has_session_context());
    }

    #[tokio::test(start_paused = true)]
    async fn stored_context_ends_error_wait() {
        let script = Arc::new(Script::new(vec![Err(ApiError::Unauthorized)]));
        let store = Arc::new(InMemorySessionContextStore::new(false));
        let provider = Arc::new(
            ChargeProvider::new(Arc::clone(&script))
                .with_context_store(Arc::clone(&store) as Arc<dyn SessionContextStore>),
        );
        let mut monitor = SessionMonitor::spawn(provider, Authentication::new("t"));
        wait_for(&mut monitor, &SessionState::Error(ApiError::Unauthorized)).await;

        script.replace(Ok(session(SessionStatus::Started)));
        store.set_session_context(true);
        wait_for(&mut monitor, &SessionState::Started(session(SessionStatus::Started))).await;
    }

    #[tokio::test(start_paused = true)]
    async fn context_flip_during_subscription_keeps_following() {
        let script = Arc::new(Script::new(vec![Ok(session(SessionStatus::Charging))]));
        let store = Arc::new(InMemorySessionContextStore::new(false));
        let provider = Arc::new(
            ChargeProvider::new(Arc::clone(&script))
                .with_context_store(Arc::clone(&store) as Arc<dyn SessionContextStore>),
        );
        let mut monitor = SessionMonitor::spawn(Arc::clone(&provider), Authentication::new("t"));
        wait_for(&mut monitor, &SessionState::Charging(session(SessionStatus::Charging))).await;

        store.set_session_context(true);
        tokio::task::yield_now().await;
        assert_eq!(
            monitor.state(),
            SessionState::Charging(session(SessionStatus::Charging))
        );
        assert_eq!(provider.subscriber_count().await, 1);

        script.replace(Ok(session(SessionStatus::Stopped)));
        wait_for(&mut monitor, &SessionState::Stopped(session(SessionStatus::Stopped))).await;
        assert!(!store.has_session_context());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_monitor_releases_subscription() {
        let script = Arc::new(Script::new(vec![Ok(session(SessionStatus::Charging))]));
        let provider = Arc::new(ChargeProvider::new(Arc::clone(&script)));
        let mut monitor = SessionMonitor::spawn(Arc::clone(&provider), Authentication::new("t"));
        wait_for(&mut monitor, &SessionState::Charging(session(SessionStatus::Charging))).await;
        assert_eq!(provider.subscriber_count().await, 1);

        monitor.shutdown();
        for _ in 0..50 {
            if !provider.has_subscribers().await {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("subscription was not released");
    }
}
