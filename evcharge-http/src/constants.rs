//! Endpoint paths and defaults of the session API.

/// Path of `GET` current session, relative to the base URL.
pub const SESSION_PATH: &str = "./session";

/// Path of `POST` start session, relative to the base URL.
pub const START_SESSION_PATH: &str = "./session/start";

/// Path of `POST` stop session, relative to the base URL.
pub const STOP_SESSION_PATH: &str = "./session/stop";

/// Longest response body kept in [`ApiError::Server`](evcharge::ApiError::Server) messages.
pub const MAX_ERROR_BODY_LEN: usize = 512;
