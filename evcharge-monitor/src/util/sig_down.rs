//! Shutdown on SIGTERM / SIGINT (Ctrl+C on other platforms).
//!
//! [`SigDown`] waits for the signal on a background task and cancels a
//! [`CancellationToken`] that the rest of the binary selects on.

use std::future::Future;
use std::io;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Cancels a token when the process is asked to stop.
#[allow(missing_debug_implementations)] // TaskTracker doesn't impl Debug
pub struct SigDown {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl SigDown {
    /// Installs the signal handlers.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if a handler cannot be registered.
    pub fn try_new() -> io::Result<Self> {
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let received = shutdown_signal()?;
        let cancel = token.clone();
        tracker.spawn(async move {
            match received.await {
                Ok(name) => {
                    #[cfg(feature = "telemetry")]
                    tracing::info!(signal = name, "Shutdown signal received");
                    #[cfg(not(feature = "telemetry"))]
                    let _ = name;
                }
                Err(err) => {
                    #[cfg(feature = "telemetry")]
                    tracing::error!(error = %err, "Signal listener failed, shutting down");
                    #[cfg(not(feature = "telemetry"))]
                    let _ = err;
                }
            }
            cancel.cancel();
        });
        tracker.close();
        Ok(Self { tracker, token })
    }

    /// Returns a clone of the token cancelled on shutdown.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits for the signal and for the listener task to finish.
    pub async fn recv(&self) {
        self.token.cancelled().await;
        self.tracker.wait().await;
    }
}

/// Registers the handlers up front so registration errors surface to the
/// caller; the returned future resolves with the signal's name.
#[cfg(unix)]
fn shutdown_signal() -> io::Result<impl Future<Output = io::Result<&'static str>> + Send> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => Ok("SIGTERM"),
            _ = sigint.recv() => Ok("SIGINT"),
        }
    })
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)] // signature shared with the unix variant
fn shutdown_signal() -> io::Result<impl Future<Output = io::Result<&'static str>> + Send> {
    Ok(async { tokio::signal::ctrl_c().await.map(|()| "Ctrl+C") })
}
