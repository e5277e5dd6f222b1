//! Monitor configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! base_url = "https://charge.example/api/"
//! token = "$EVCHARGE_TOKEN"
//! poll_interval_secs = 2
//! retry_delay_secs = 10
//! request_timeout_secs = 15
//! start_session = false
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to configuration file (default: `config.toml`)
//! - `EVCHARGE_URL` - Override the backend base URL
//! - `EVCHARGE_TOKEN` - Override the access token

use std::path::Path;
use std::time::Duration;

use evcharge::{Authentication, UnixTimestamp};
use serde::Deserialize;

/// Errors raised while loading a [`MonitorConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that was being read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML or does not match the schema.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A required value is missing after expansion and overrides.
    #[error("missing configuration value `{0}`")]
    Missing(&'static str),
}

/// Top-level monitor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Base URL of the charge backend.
    #[serde(default)]
    pub base_url: String,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub token: String,

    /// Unix time at which the token expires, if known.
    #[serde(default)]
    pub token_expires_at: Option<u64>,

    /// Seconds between polls (default: `2`).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds to wait before resubscribing after an error (default: `5`).
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Per-request timeout in seconds (default: `10`).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Whether to start a charging session before monitoring.
    #[serde(default)]
    pub start_session: bool,
}

const fn default_poll_interval_secs() -> u64 {
    2
}

const fn default_retry_delay_secs() -> u64 {
    5
}

const fn default_request_timeout_secs() -> u64 {
    10
}

impl MonitorConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `config.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, or if
    /// no base URL or token is configured.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file is treated as empty, so everything can come from the
    /// environment. `EVCHARGE_URL` and `EVCHARGE_TOKEN` override file values.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, or if
    /// no base URL or token is configured.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?
        } else {
            String::new()
        };

        let mut config = Self::from_toml_str(&content)?;
        if let Ok(url) = std::env::var("EVCHARGE_URL") {
            config.base_url = url;
        }
        if let Ok(token) = std::env::var("EVCHARGE_TOKEN") {
            config.token = token;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from TOML text after expanding `$VAR` references.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not a valid configuration.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(&expand_env_vars(content))?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("base_url"));
        }
        if self.token.trim().is_empty() || self.token.starts_with('$') {
            return Err(ConfigError::Missing("token"));
        }
        Ok(())
    }

    /// Interval between polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Delay before resubscribing after an error.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Credentials built from the configured token.
    #[must_use]
    pub fn authentication(&self) -> Authentication {
        let auth = Authentication::new(self.token.trim());
        match self.token_expires_at {
            Some(secs) => auth.with_expiry(UnixTimestamp::from_secs(secs)),
            None => auth,
        }
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.next_if_eq(&'{').is_some();
        let mut name = String::new();
        let mut closed = false;
        while let Some(&c) = chars.peek() {
            if braced && c == '}' {
                chars.next();
                closed = true;
                break;
            }
            if !braced && !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            name.push(c);
            chars.next();
        }

        match std::env::var(&name) {
            Ok(value) if !name.is_empty() => result.push_str(&value),
            _ => {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&name);
                if closed {
                    result.push('}');
                }
            }
        }
    }

    result
}
