//! A [`SessionFetcher`] / [`SessionCommands`] implementation talking to the
//! charge backend over HTTP.
//!
//! [`HttpChargeClient`] handles the `GET /session`, `POST /session/start` and
//! `POST /session/stop` endpoints relative to a base URL.
//!
//! ## Features
//!
//! - Uses `reqwest` for async HTTP requests
//! - Supports optional timeout and extra headers
//! - Integrates with `tracing` if the `telemetry` feature is enabled
//!
//! ## Error Handling
//!
//! Every request failure is mapped onto the typed [`ApiError`] taxonomy so
//! the polling coordinator can broadcast it unchanged:
//! - transport timeouts and connect failures become
//!   [`ApiError::Connectivity`]
//! - `401`/`403` become [`ApiError::Unauthorized`]
//! - any other non-success status becomes [`ApiError::Server`]
//! - undecodable bodies become [`ApiError::Decode`]

use std::fmt::Display;
use std::time::Duration;

use evcharge::{
    ApiError, Authentication, BoxFuture, ConnectivityError, Session, SessionCommands,
    SessionFetcher,
};
use http::{HeaderMap, StatusCode};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::{Span, instrument};

use crate::constants::{MAX_ERROR_BODY_LEN, SESSION_PATH, START_SESSION_PATH, STOP_SESSION_PATH};
use crate::error::HttpClientError;

/// Error payload some backends attach to failed responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

/// A client for the charge backend's session endpoints.
#[derive(Clone, Debug)]
pub struct HttpChargeClient {
    /// Base URL of the backend (e.g. `https://charge.example/api/`)
    base_url: Url,
    /// Full URL to `GET /session` requests
    session_url: Url,
    /// Full URL to `POST /session/start` requests
    start_url: Url,
    /// Full URL to `POST /session/stop` requests
    stop_url: Url,
    /// Shared Reqwest HTTP client
    client: Client,
    /// Optional custom headers sent with each request
    headers: HeaderMap,
    /// Optional request timeout
    timeout: Option<Duration>,
}

impl HttpChargeClient {
    /// Returns the base URL used by this client.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the computed `./session` URL.
    #[must_use]
    pub const fn session_url(&self) -> &Url {
        &self.session_url
    }

    /// Returns the computed `./session/start` URL.
    #[must_use]
    pub const fn start_url(&self) -> &Url {
        &self.start_url
    }

    /// Returns the computed `./session/stop` URL.
    #[must_use]
    pub const fn stop_url(&self) -> &Url {
        &self.stop_url
    }

    /// Returns any custom headers configured on the client.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the configured timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Constructs a new [`HttpChargeClient`] from a base URL.
    ///
    /// # Errors
    ///
    /// Returns [`HttpClientError`] if an endpoint URL cannot be derived.
    pub fn try_new(base_url: Url) -> Result<Self, HttpClientError> {
        let join = |path: &str, context: &'static str| {
            base_url
                .join(path)
                .map_err(|source| HttpClientError::UrlParse { context, source })
        };
        let session_url = join(SESSION_PATH, "Failed to construct ./session URL")?;
        let start_url = join(START_SESSION_PATH, "Failed to construct ./session/start URL")?;
        let stop_url = join(STOP_SESSION_PATH, "Failed to construct ./session/stop URL")?;
        Ok(Self {
            client: Client::new(),
            base_url,
            session_url,
            start_url,
            stop_url,
            headers: HeaderMap::new(),
            timeout: None,
        })
    }

    /// Attaches custom headers to all future requests.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replaces the underlying reqwest client.
    #[must_use]
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Sends `GET /session`.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ApiError`] if the request fails.
    #[cfg_attr(
        feature = "telemetry",
        instrument(
            name = "evcharge.http.fetch_session",
            skip_all,
            err,
            fields(otel.status_code = tracing::field::Empty, error.message = tracing::field::Empty)
        )
    )]
    pub async fn fetch(&self, authentication: &Authentication) -> Result<Session, ApiError> {
        let request = self.client.get(self.session_url.clone());
        let result = self.fetch_body(request, authentication).await;
        record_result_on_span(&result);
        result
    }

    async fn fetch_body(
        &self,
        request: RequestBuilder,
        authentication: &Authentication,
    ) -> Result<Session, ApiError> {
        let response = self.send(request, authentication).await?;
        // a stalled body surfaces here as a transport timeout, not a decode error
        let body = response.bytes().await.map_err(map_transport_error)?;
        serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Sends `POST /session/start`.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ApiError`] if the request fails.
    #[cfg_attr(
        feature = "telemetry",
        instrument(
            name = "evcharge.http.start_session",
            skip_all,
            err,
            fields(otel.status_code = tracing::field::Empty, error.message = tracing::field::Empty)
        )
    )]
    pub async fn start(&self, authentication: &Authentication) -> Result<(), ApiError> {
        let request = self.client.post(self.start_url.clone());
        let result = self.send(request, authentication).await.map(drop);
        record_result_on_span(&result);
        result
    }

    /// Sends `POST /session/stop`.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ApiError`] if the request fails.
    #[cfg_attr(
        feature = "telemetry",
        instrument(
            name = "evcharge.http.stop_session",
            skip_all,
            err,
            fields(otel.status_code = tracing::field::Empty, error.message = tracing::field::Empty)
        )
    )]
    pub async fn stop(&self, authentication: &Authentication) -> Result<(), ApiError> {
        let request = self.client.post(self.stop_url.clone());
        let result = self.send(request, authentication).await.map(drop);
        record_result_on_span(&result);
        result
    }

    /// Applies auth, headers and timeout, sends the request and maps any
    /// non-success status to an [`ApiError`].
    async fn send(
        &self,
        mut request: RequestBuilder,
        authentication: &Authentication,
    ) -> Result<Response, ApiError> {
        if authentication.is_expired() {
            return Err(ApiError::Unauthorized);
        }
        request = request.bearer_auth(authentication.token());
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Server {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }
}

impl SessionFetcher for HttpChargeClient {
    fn fetch_session<'a>(
        &'a self,
        authentication: &'a Authentication,
    ) -> BoxFuture<'a, Result<Session, ApiError>> {
        Box::pin(self.fetch(authentication))
    }
}

impl SessionCommands for HttpChargeClient {
    fn start_session<'a>(
        &'a self,
        authentication: &'a Authentication,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(self.start(authentication))
    }

    fn stop_session<'a>(
        &'a self,
        authentication: &'a Authentication,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(self.stop(authentication))
    }
}

/// Converts a string URL into an `HttpChargeClient`, parsing the URL and calling `try_new`.
impl TryFrom<&str> for HttpChargeClient {
    type Error = HttpClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Normalize: strip trailing slashes and add a single trailing slash
        let mut normalized = value.trim_end_matches('/').to_owned();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| HttpClientError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        Self::try_new(url)
    }
}

/// Converts a String URL into an `HttpChargeClient`.
impl TryFrom<String> for HttpChargeClient {
    type Error = HttpClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

fn map_transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ConnectivityError::TimedOut.into()
    } else if err.is_connect() {
        ConnectivityError::Unreachable(err.to_string()).into()
    } else if err.is_decode() {
        ApiError::Decode(err.to_string())
    } else if err.is_request() || err.is_body() {
        ConnectivityError::Other(err.to_string()).into()
    } else {
        ApiError::Unknown(err.to_string())
    }
}

/// Extracts a message from a JSON error body, falling back to the raw text.
fn error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.message.or(parsed.error) {
            return Some(message);
        }
    }
    Some(body.chars().take(MAX_ERROR_BODY_LEN).collect())
}

/// Records the outcome of a request on a tracing span, including status and errors.
#[cfg(feature = "telemetry")]
fn record_result_on_span<R, E: Display>(result: &Result<R, E>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", tracing::field::display(err));
            tracing::event!(tracing::Level::ERROR, error = %err, "Request to charge backend failed");
        }
    }
}

/// Records the outcome of a request on a tracing span, including status and errors.
/// Noop if telemetry feature is off.
#[cfg(not(feature = "telemetry"))]
fn record_result_on_span<R, E: Display>(_result: &Result<R, E>) {}
