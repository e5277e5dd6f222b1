//! Collaborator traits at the backend boundary.
//!
//! - [`SessionFetcher`] performs one round-trip and returns the current
//!   [`Session`] snapshot. The polling coordinator is generic over it.
//! - [`SessionCommands`] issues the one-shot start/stop commands that are not
//!   part of the polling loop.
//!
//! Both traits return boxed futures so they stay object-safe.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::auth::Authentication;
use crate::error::ApiError;
use crate::session::Session;

/// A pinned, boxed, `Send` future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Fetches the current charge session for an authentication.
pub trait SessionFetcher: Send + Sync {
    /// Performs one backend round-trip.
    fn fetch_session<'a>(
        &'a self,
        authentication: &'a Authentication,
    ) -> BoxFuture<'a, Result<Session, ApiError>>;
}

/// Starts and stops charge sessions.
pub trait SessionCommands: Send + Sync {
    /// Asks the backend to start charging.
    fn start_session<'a>(
        &'a self,
        authentication: &'a Authentication,
    ) -> BoxFuture<'a, Result<(), ApiError>>;

    /// Asks the backend to stop charging.
    fn stop_session<'a>(
        &'a self,
        authentication: &'a Authentication,
    ) -> BoxFuture<'a, Result<(), ApiError>>;
}

impl<T: SessionFetcher + ?Sized> SessionFetcher for Arc<T> {
    fn fetch_session<'a>(
        &'a self,
        authentication: &'a Authentication,
    ) -> BoxFuture<'a, Result<Session, ApiError>> {
        (**self).fetch_session(authentication)
    }
}

impl<T: SessionCommands + ?Sized> SessionCommands for Arc<T> {
    fn start_session<'a>(
        &'a self,
        authentication: &'a Authentication,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        (**self).start_session(authentication)
    }

    fn stop_session<'a>(
        &'a self,
        authentication: &'a Authentication,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        (**self).stop_session(authentication)
    }
}
