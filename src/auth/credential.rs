//! Bearer credential.

// ============================================================================
// Imports
// ============================================================================

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Lifetime given to long-lived tokens (effectively never expires).
const LONG_LIVED_SECONDS: i64 = 100_000_000_000 / 1000;

/// WebSocket API path on the server.
const WEBSOCKET_PATH: &str = "/api/websocket";

// ============================================================================
// Credential
// ============================================================================

/// Access token, its expiry and the means to refresh it.
///
/// Serializes with `expires` as epoch milliseconds so an injected
/// [`TokenStore`](super::TokenStore) can persist it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Base URL of the issuing server (no trailing slash).
    pub hass_url: String,

    /// OAuth client id, `None` for long-lived tokens.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Bearer token sent during the handshake.
    pub access_token: String,

    /// Absolute expiry of `access_token`.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires: DateTime<Utc>,

    /// Refresh token. Empty for long-lived tokens.
    #[serde(default)]
    pub refresh_token: String,
}

impl Credential {
    /// Creates a credential expiring `expires_in` seconds from now.
    ///
    /// Lifetimes beyond the representable range saturate.
    #[must_use]
    pub fn new(
        hass_url: impl Into<String>,
        client_id: Option<String>,
        access_token: impl Into<String>,
        expires_in: i64,
        refresh_token: impl Into<String>,
    ) -> Self {
        let expires = expiry_from_now(expires_in).unwrap_or(if expires_in < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        });
        Self::expiring_at(hass_url, client_id, access_token, expires, refresh_token)
    }

    /// Creates a credential with an absolute expiry.
    #[must_use]
    pub fn expiring_at(
        hass_url: impl Into<String>,
        client_id: Option<String>,
        access_token: impl Into<String>,
        expires: DateTime<Utc>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            hass_url: trim_trailing_slash(hass_url.into()),
            client_id,
            access_token: access_token.into(),
            expires,
            refresh_token: refresh_token.into(),
        }
    }

    /// Creates a credential for a long-lived access token.
    ///
    /// It never expires in practice and has no refresh token.
    #[must_use]
    pub fn long_lived(hass_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self::new(hass_url, None, access_token, LONG_LIVED_SECONDS, "")
    }

    /// Returns `true` once the access token has expired.
    #[inline]
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires
    }

    /// Returns `true` if this credential can be refreshed.
    #[inline]
    #[must_use]
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Returns the WebSocket endpoint derived from `hass_url`.
    ///
    /// `http` becomes `ws`, `https` becomes `wss`.
    ///
    /// # Errors
    ///
    /// - [`Error::HostRequired`] if `hass_url` is empty
    /// - [`Error::Url`] if `hass_url` does not parse
    /// - [`Error::Config`] for a non-http(s) scheme
    pub fn ws_url(&self) -> Result<Url> {
        if self.hass_url.is_empty() {
            return Err(Error::HostRequired);
        }

        let mut url = Url::parse(&self.hass_url)?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(Error::config(format!(
                    "Unsupported server scheme: {other}"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::config("Cannot derive WebSocket scheme"))?;

        let path = format!("{}{WEBSOCKET_PATH}", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Converts a relative lifetime in seconds to an absolute expiry.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the expiry is out of range.
pub fn expiry_from_now(expires_in: i64) -> Result<DateTime<Utc>> {
    TimeDelta::try_seconds(expires_in)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| Error::protocol(format!("Token lifetime out of range: {expires_in}s")))
}

fn trim_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_derivation() {
        let cred = Credential::long_lived("http://localhost:8123/", "t");
        assert_eq!(cred.hass_url, "http://localhost:8123");
        assert_eq!(
            cred.ws_url().expect("url").as_str(),
            "ws://localhost:8123/api/websocket"
        );

        let cred = Credential::long_lived("https://home.example.com", "t");
        assert_eq!(
            cred.ws_url().expect("url").as_str(),
            "wss://home.example.com/api/websocket"
        );
    }

    #[test]
    fn test_ws_url_requires_host() {
        let cred = Credential::long_lived("", "t");
        assert!(matches!(cred.ws_url(), Err(Error::HostRequired)));
    }

    #[test]
    fn test_long_lived_never_expires() {
        let cred = Credential::long_lived("http://h", "t");
        assert!(!cred.is_expired());
        assert!(!cred.has_refresh_token());
    }

    #[test]
    fn test_expired_credential() {
        let cred = Credential::new("http://h", None, "t", -10, "r");
        assert!(cred.is_expired());
        assert!(cred.has_refresh_token());
    }

    #[test]
    fn test_expiry_out_of_range() {
        assert!(matches!(expiry_from_now(i64::MAX), Err(Error::Protocol { .. })));
        assert!(expiry_from_now(3600).is_ok());

        let cred = Credential::new("http://h", None, "t", i64::MAX, "r");
        assert!(!cred.is_expired());
        let cred = Credential::new("http://h", None, "t", i64::MIN, "r");
        assert!(cred.is_expired());
    }

    #[test]
    fn test_serde_expires_as_millis() {
        let mut cred = Credential::long_lived("http://h", "t");
        cred.expires = DateTime::from_timestamp_millis(1_700_000_000_123).expect("valid");
        let value = serde_json::to_value(&cred).expect("serialize");
        assert_eq!(value["expires"], 1_700_000_000_123_i64);

        let back: Credential = serde_json::from_value(value).expect("parse");
        assert_eq!(back, cred);
    }
}
