//! Authenticated channel setup.
//!
//! # Handshake Flow
//!
//! 1. Open a raw [`Channel`] through the [`Connector`]
//! 2. Wait for `auth_required` (anything else is ignored)
//! 3. Send `auth` with a fresh access token
//! 4. `auth_ok` → negotiate features (server ≥ 2022.9) and hand the channel over
//! 5. `auth_invalid` → fail with [`Error::InvalidAuth`], never retried
//! 6. Channel closed first → retry after a fixed interval while budget remains,
//!    then fail with [`Error::CannotConnect`]

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};
use url::Url;

use crate::auth::AuthSession;
use crate::error::{Error, Result};
use crate::protocol::command::supported_features_frame;
use crate::protocol::{AuthMessage, HandshakeMessage, at_least_version};

use super::channel::{Channel, Connector};

// ============================================================================
// Constants
// ============================================================================

/// Default delay between connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// SetupRetry
// ============================================================================

/// Retry budget for establishing an authenticated channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupRetry {
    /// Retry at most this many times after the first attempt.
    Limited(u32),
    /// Retry forever.
    Unlimited,
}

impl SetupRetry {
    /// Budget with no retries.
    pub const NONE: Self = Self::Limited(0);

    /// Consumes one retry. Returns `None` once the budget is exhausted.
    #[must_use]
    pub const fn consume(self) -> Option<Self> {
        match self {
            Self::Limited(0) => None,
            Self::Limited(n) => Some(Self::Limited(n - 1)),
            Self::Unlimited => Some(Self::Unlimited),
        }
    }
}

impl Default for SetupRetry {
    fn default() -> Self {
        Self::NONE
    }
}

// ============================================================================
// AuthenticatedChannel
// ============================================================================

/// A channel that completed authentication.
#[derive(Debug)]
pub struct AuthenticatedChannel {
    /// The ready-to-use channel.
    pub channel: Channel,
    /// Server version reported in `auth_ok`.
    pub ha_version: String,
}

// ============================================================================
// AttemptFailure
// ============================================================================

/// Outcome of a failed single attempt.
enum AttemptFailure {
    /// Terminal: credential rejected.
    Rejected(Error),
    /// Transient: channel closed or could not be opened.
    Dropped(String),
}

// ============================================================================
// Handshake
// ============================================================================

/// Produces authenticated channels on demand.
///
/// Cheap to clone; the connection keeps one to reconnect with.
#[derive(Clone)]
pub struct Handshake {
    connector: Arc<dyn Connector>,
    auth: Arc<AuthSession>,
    retry_interval: Duration,
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("auth", &self.auth)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}

impl Handshake {
    /// Creates a handshake over `connector` authenticating with `auth`.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, auth: Arc<AuthSession>) -> Self {
        Self {
            connector,
            auth,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Sets the delay between attempts.
    #[must_use]
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Returns the session used to authenticate.
    #[must_use]
    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    /// Opens and authenticates a channel.
    ///
    /// # Errors
    ///
    /// - [`Error::HostRequired`] if the session has no server URL
    /// - [`Error::InvalidAuth`] if the server rejects the credential or the
    ///   credential cannot be refreshed (no retry)
    /// - [`Error::CannotConnect`] once the retry budget is exhausted
    pub async fn connect(&self, retry: SetupRetry) -> Result<AuthenticatedChannel> {
        let url = self
            .auth
            .credential()
            .ok_or(Error::HostRequired)?
            .ws_url()?;

        let mut budget = retry;
        loop {
            match self.attempt(&url).await {
                Ok(authenticated) => return Ok(authenticated),
                Err(AttemptFailure::Rejected(err)) => {
                    warn!(%url, error = %err, "Authentication rejected");
                    return Err(err);
                }
                Err(AttemptFailure::Dropped(reason)) => {
                    let Some(remaining) = budget.consume() else {
                        debug!(%url, reason, "Retry budget exhausted");
                        return Err(Error::CannotConnect);
                    };
                    budget = remaining;
                    debug!(
                        %url,
                        reason,
                        delay_ms = self.retry_interval.as_millis() as u64,
                        "Connection attempt failed, retrying"
                    );
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    /// Runs one connection attempt.
    async fn attempt(&self, url: &Url) -> std::result::Result<AuthenticatedChannel, AttemptFailure> {
        debug!(%url, "New connection attempt");
        let mut channel = self
            .connector
            .open(url)
            .await
            .map_err(|e| AttemptFailure::Dropped(e.to_string()))?;

        let mut auth_sent = false;
        loop {
            let Some(text) = channel.recv().await else {
                return Err(AttemptFailure::Dropped(
                    "Channel closed during authentication".into(),
                ));
            };

            match HandshakeMessage::parse(&text) {
                HandshakeMessage::AuthRequired { .. } if !auth_sent => {
                    let token = match self.auth.access_token().await {
                        Ok(token) => token,
                        Err(e) => {
                            channel.close();
                            return Err(classify_token_error(e));
                        }
                    };
                    let frame = serde_json::to_string(&AuthMessage::new(&token))
                        .map_err(|e| AttemptFailure::Dropped(e.to_string()))?;
                    channel
                        .send(frame)
                        .map_err(|e| AttemptFailure::Dropped(e.to_string()))?;
                    auth_sent = true;
                }

                HandshakeMessage::AuthInvalid { message } => {
                    channel.close();
                    return Err(AttemptFailure::Rejected(Error::invalid_auth(
                        message.unwrap_or_else(|| "Invalid access token".into()),
                    )));
                }

                HandshakeMessage::AuthOk { ha_version } => {
                    if at_least_version(&ha_version, 2022, 9, None) {
                        channel
                            .send(supported_features_frame())
                            .map_err(|e| AttemptFailure::Dropped(e.to_string()))?;
                    }
                    info!(%url, ha_version, "Authenticated");
                    return Ok(AuthenticatedChannel {
                        channel,
                        ha_version,
                    });
                }

                HandshakeMessage::AuthRequired { .. } | HandshakeMessage::Other => {
                    trace!(frame = %text, "Ignoring frame during authentication");
                }
            }
        }
    }
}

/// Auth failures while obtaining a token are terminal; anything else is
/// treated like a dropped channel.
fn classify_token_error(err: Error) -> AttemptFailure {
    match err {
        Error::InvalidAuth { .. } => AttemptFailure::Rejected(err),
        other if other.is_auth_error() => {
            AttemptFailure::Rejected(Error::invalid_auth(other.to_string()))
        }
        other => AttemptFailure::Dropped(other.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::auth::Credential;
    use crate::transport::memory::{MemoryListener, memory_connector};

    fn handshake() -> (Handshake, MemoryListener) {
        let (connector, listener) = memory_connector();
        let auth = Arc::new(AuthSession::new(Credential::long_lived(
            "http://memory:8123",
            "secret",
        )));
        (Handshake::new(Arc::new(connector), auth), listener)
    }

    #[test]
    fn test_setup_retry_budget() {
        assert_eq!(SetupRetry::Limited(2).consume(), Some(SetupRetry::Limited(1)));
        assert_eq!(SetupRetry::Limited(0).consume(), None);
        assert_eq!(SetupRetry::Unlimited.consume(), Some(SetupRetry::Unlimited));
        assert_eq!(SetupRetry::default(), SetupRetry::NONE);
    }

    #[tokio::test]
    async fn test_successful_handshake_with_feature_negotiation() {
        let (handshake, mut listener) = handshake();
        let client = tokio::spawn(async move { handshake.connect(SetupRetry::NONE).await });

        let mut peer = listener.accept().await.expect("peer");
        assert_eq!(peer.url().as_str(), "ws://memory:8123/api/websocket");

        // Nothing is sent before auth_required.
        assert!(peer.try_recv_json().is_none());
        peer.send_json(&json!({"type": "auth_required", "ha_version": "2024.1.0"}));

        let auth = peer.recv_json().await.expect("auth frame");
        assert_eq!(auth, json!({"type": "auth", "access_token": "secret"}));

        peer.send_json(&json!({"type": "auth_ok", "ha_version": "2024.1.0"}));
        let authenticated = client.await.expect("join").expect("handshake");
        assert_eq!(authenticated.ha_version, "2024.1.0");

        let features = peer.recv_json().await.expect("features frame");
        assert_eq!(features["type"], "supported_features");
        assert_eq!(features["id"], 1);
    }

    #[tokio::test]
    async fn test_old_server_skips_feature_negotiation() {
        let (handshake, mut listener) = handshake();
        let client = tokio::spawn(async move { handshake.connect(SetupRetry::NONE).await });

        let mut peer = listener.accept().await.expect("peer");
        peer.send_json(&json!({"type": "auth_required"}));
        peer.recv_json().await.expect("auth frame");
        peer.send_json(&json!({"type": "auth_ok", "ha_version": "2022.8.0"}));

        client.await.expect("join").expect("handshake");
        assert!(peer.try_recv_json().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_invalid_fails_without_retry() {
        let (handshake, mut listener) = handshake();
        let client = tokio::spawn(async move { handshake.connect(SetupRetry::Unlimited).await });

        let mut peer = listener.accept().await.expect("peer");
        peer.send_json(&json!({"type": "auth_required"}));
        peer.recv_json().await.expect("auth frame");
        peer.send_json(&json!({"type": "auth_invalid", "message": "Invalid password"}));

        let result = client.await.expect("join");
        assert!(matches!(result, Err(Error::InvalidAuth { .. })));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(listener.try_accept().is_none(), "no retry after auth_invalid");
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_invalid_before_auth_required() {
        let (handshake, mut listener) = handshake();
        let client = tokio::spawn(async move { handshake.connect(SetupRetry::Limited(3)).await });

        let peer = listener.accept().await.expect("peer");
        peer.send_json(&json!({"type": "auth_invalid"}));

        assert!(matches!(
            client.await.expect("join"),
            Err(Error::InvalidAuth { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_retries_then_cannot_connect() {
        let (handshake, mut listener) = handshake();
        let client = tokio::spawn(async move { handshake.connect(SetupRetry::Limited(2)).await });

        for _ in 0..3 {
            let peer = listener.accept().await.expect("peer");
            drop(peer);
        }

        assert!(matches!(
            client.await.expect("join"),
            Err(Error::CannotConnect)
        ));
        assert!(listener.try_accept().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let (handshake, mut listener) = handshake();
        let client = tokio::spawn(async move { handshake.connect(SetupRetry::Unlimited).await });

        drop(listener.accept().await.expect("first peer"));

        let mut peer = listener.accept().await.expect("second peer");
        peer.send_json(&json!({"type": "auth_required"}));
        peer.recv_json().await.expect("auth frame");
        peer.send_json(&json!({"type": "auth_ok", "ha_version": "2023.1.0"}));

        let authenticated = client.await.expect("join").expect("handshake");
        assert_eq!(authenticated.ha_version, "2023.1.0");
    }

    #[tokio::test]
    async fn test_unrelated_frames_are_ignored() {
        let (handshake, mut listener) = handshake();
        let client = tokio::spawn(async move { handshake.connect(SetupRetry::NONE).await });

        let mut peer = listener.accept().await.expect("peer");
        peer.send_text("not json at all");
        peer.send_json(&json!({"type": "something_new"}));
        peer.send_json(&json!({"type": "auth_required"}));
        peer.recv_json().await.expect("auth frame");
        peer.send_json(&json!({"type": "event", "id": 99}));
        peer.send_json(&json!({"type": "auth_ok", "ha_version": "2024.1.0"}));

        assert!(client.await.expect("join").is_ok());
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_is_rejected() {
        let (connector, mut listener) = memory_connector();
        let auth = Arc::new(AuthSession::new(Credential::new(
            "http://memory:8123",
            None,
            "stale",
            -60,
            "",
        )));
        let handshake = Handshake::new(Arc::new(connector), auth);
        let client = tokio::spawn(async move { handshake.connect(SetupRetry::Unlimited).await });

        let peer = listener.accept().await.expect("peer");
        peer.send_json(&json!({"type": "auth_required"}));

        assert!(matches!(
            client.await.expect("join"),
            Err(Error::InvalidAuth { .. })
        ));
    }
}
