//! Error taxonomy for the session RPC boundary.
//!
//! Every failure the backend boundary can produce is a typed [`ApiError`].
//! The type is `Clone` so that a single failed poll can be delivered verbatim
//! to every subscriber of the shared stream.

/// Failure to reach the backend at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectivityError {
    /// The device has no network connection.
    #[error("device is offline")]
    Offline,
    /// DNS resolution or connection establishment failed.
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    /// The request did not complete in time.
    #[error("request timed out")]
    TimedOut,
    /// Any other transport-level failure.
    #[error("{0}")]
    Other(String),
}

/// Typed error surfaced by session fetch, start and stop operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The backend could not be reached.
    #[error("connectivity error: {0}")]
    Connectivity(#[from] ConnectivityError),

    /// The credential was rejected or has expired.
    #[error("unauthorized")]
    Unauthorized,

    /// The backend answered with an unexpected status.
    #[error("server error {status}{}", suffix(.message))]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body or backend-provided message, if any.
        message: Option<String>,
    },

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Fallback for failures that fit no other category.
    #[error("unknown error: {0}")]
    Unknown(String),
}

fn suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

impl ApiError {
    /// Returns `true` if the caller should run its re-authorization flow.
    #[must_use]
    pub const fn requires_reauthorization(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Returns `true` if resubscribing later may succeed without user action.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Connectivity(_) => true,
            Self::Server { status, .. } => *status >= 500,
            Self::Unauthorized | Self::Decode(_) | Self::Unknown(_) => false,
        }
    }
}
