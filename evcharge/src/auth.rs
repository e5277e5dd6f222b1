//! Credentials scoping which backend session is observed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::timestamp::UnixTimestamp;

/// Opaque bearer credential with an optional expiry.
///
/// Two authentications are equal when both the token and the expiry match;
/// the coordinator binds each polling epoch to the authentication of the
/// subscriber that started it.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<UnixTimestamp>,
}

impl Authentication {
    /// Creates a credential that never expires.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    /// Sets the expiry instant.
    #[must_use]
    pub const fn with_expiry(mut self, expires_at: UnixTimestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns the raw token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns the expiry instant, if any.
    #[must_use]
    pub const fn expires_at(&self) -> Option<UnixTimestamp> {
        self.expires_at
    }

    /// Returns `true` if the credential has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: UnixTimestamp) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Returns `true` if the credential has expired according to the system clock.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(UnixTimestamp::now())
    }
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authentication")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_by_value() {
        assert_eq!(Authentication::new("abc"), Authentication::new("abc"));
        assert_ne!(
            Authentication::new("abc"),
            Authentication::new("abc").with_expiry(UnixTimestamp::from_secs(1))
        );
    }

    #[test]
    fn expiry() {
        let auth = Authentication::new("t").with_expiry(UnixTimestamp::from_secs(100));
        assert!(!auth.is_expired_at(UnixTimestamp::from_secs(99)));
        assert!(auth.is_expired_at(UnixTimestamp::from_secs(100)));
        assert!(!Authentication::new("t").is_expired());
    }

    #[test]
    fn debug_redacts_token() {
        let debug = format!("{:?}", Authentication::new("secret-token"));
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("redacted"));
    }
}
