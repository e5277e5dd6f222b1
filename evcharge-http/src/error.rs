//! Error types for constructing the HTTP client.
//!
//! Request-time failures are reported as [`evcharge::ApiError`]; this module
//! only covers misconfiguration detected before any request is sent.

/// Errors that can occur while building an [`HttpChargeClient`](crate::HttpChargeClient).
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    /// The base URL or a derived endpoint URL could not be parsed.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// What was being parsed.
        context: &'static str,
        /// Underlying parse error.
        #[source]
        source: url::ParseError,
    },
}
