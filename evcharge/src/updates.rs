//! Per-subscriber delivery channel with newest-wins buffering.
//!
//! Each subscriber owns a single-slot mailbox. A [`SessionSink`] (held by the
//! registry) writes into it, a [`SessionUpdates`] (held by the caller) reads
//! from it. An unread session is overwritten by a newer one, so memory stays
//! bounded no matter how slow the consumer is. A terminal event is delivered
//! after any pending session and ends the stream.

use std::fmt;
use std::sync::Arc;

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::ApiError;
use crate::registry::{SubscriberId, SubscriptionRegistry};
use crate::session::Session;

#[derive(Debug)]
enum Terminal {
    Failed(ApiError),
    Closed,
}

#[derive(Debug, Default)]
struct Slot {
    latest: Option<Session>,
    terminal: Option<Terminal>,
    receiver_dropped: bool,
}

#[derive(Debug, Default)]
struct Mailbox {
    slot: Mutex<Slot>,
    notify: Notify,
}

/// Creates a connected sink/receiver pair sharing one empty mailbox.
pub(crate) fn mailbox() -> (SessionSink, MailboxReceiver) {
    let mailbox = Arc::new(Mailbox::default());
    (
        SessionSink {
            mailbox: Arc::clone(&mailbox),
        },
        MailboxReceiver { mailbox },
    )
}

/// Write side of a subscriber's mailbox.
///
/// Cloning a sink yields another handle to the same mailbox.
#[derive(Clone)]
pub struct SessionSink {
    mailbox: Arc<Mailbox>,
}

impl fmt::Debug for SessionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSink")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionSink {
    /// Stores `session` as the latest value, replacing any unread one.
    ///
    /// Returns `false` if the mailbox was already finished or its receiver
    /// is gone; the value is dropped in that case.
    pub fn send(&self, session: Session) -> bool {
        {
            let mut slot = self.mailbox.slot.lock();
            if slot.terminal.is_some() || slot.receiver_dropped {
                return false;
            }
            slot.latest = Some(session);
        }
        self.mailbox.notify.notify_one();
        true
    }

    /// Terminates the stream with `error`.
    ///
    /// A pending session is still delivered first. Finishing twice keeps the
    /// first terminal event.
    pub fn finish(&self, error: ApiError) {
        self.terminate(Terminal::Failed(error));
    }

    /// Terminates the stream without an error.
    pub fn close(&self) {
        self.terminate(Terminal::Closed);
    }

    /// Returns `true` once the stream was finished or its receiver dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        let slot = self.mailbox.slot.lock();
        slot.terminal.is_some() || slot.receiver_dropped
    }

    fn terminate(&self, terminal: Terminal) {
        {
            let mut slot = self.mailbox.slot.lock();
            if slot.terminal.is_some() {
                return;
            }
            slot.terminal = Some(terminal);
        }
        self.mailbox.notify.notify_one();
    }
}

/// Read side of a subscriber's mailbox.
#[derive(Debug)]
pub(crate) struct MailboxReceiver {
    mailbox: Arc<Mailbox>,
}

impl MailboxReceiver {
    async fn recv(&self) -> Option<Result<Session, ApiError>> {
        loop {
            {
                let mut slot = self.mailbox.slot.lock();
                if let Some(session) = slot.latest.take() {
                    return Some(Ok(session));
                }
                match slot.terminal.replace(Terminal::Closed) {
                    Some(Terminal::Failed(error)) => return Some(Err(error)),
                    Some(Terminal::Closed) => return None,
                    None => slot.terminal = None,
                }
            }
            self.mailbox.notify.notified().await;
        }
    }

    fn mark_dropped(&self) {
        let mut slot = self.mailbox.slot.lock();
        slot.receiver_dropped = true;
        slot.latest = None;
    }
}

/// A subscriber's view of the shared session stream.
///
/// Yields `Ok(session)` for every poll delivered to this subscriber (older
/// unread sessions are skipped), at most one `Err(error)` when the polling
/// epoch fails, and then `None` forever.
///
/// Dropping the stream unsubscribes: the subscriber is removed from the
/// registry asynchronously on the current tokio runtime.
pub struct SessionUpdates {
    id: SubscriberId,
    receiver: MailboxReceiver,
    registry: Arc<SubscriptionRegistry>,
}

impl fmt::Debug for SessionUpdates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionUpdates")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl SessionUpdates {
    pub(crate) const fn new(
        id: SubscriberId,
        receiver: MailboxReceiver,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            id,
            receiver,
            registry,
        }
    }

    /// Returns this subscriber's identity.
    #[must_use]
    pub const fn id(&self) -> &SubscriberId {
        &self.id
    }

    /// Waits for the next session or terminal event.
    pub async fn next(&mut self) -> Option<Result<Session, ApiError>> {
        self.receiver.recv().await
    }

    /// Converts this subscription into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<Session, ApiError>> + Send {
        futures_util::stream::unfold(self, |mut updates| async move {
            let item = updates.next().await?;
            Some((item, updates))
        })
    }
}

impl Drop for SessionUpdates {
    fn drop(&mut self) {
        self.receiver.mark_dropped();
        let id = self.id.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let registry = Arc::clone(&self.registry);
            runtime.spawn(async move {
                registry.remove_subscriber(&id).await;
            });
        } else if !self.registry.try_remove_subscriber(&id) {
            #[cfg(feature = "telemetry")]
            tracing::warn!(subscriber = %id, "no runtime to unsubscribe; removal deferred to next poll");
        }
    }
}
