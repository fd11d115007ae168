//! Connection configuration and builder.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use hass_socket::{AuthSession, Connection, Credential, SetupRetry};
//!
//! # async fn example() -> hass_socket::Result<()> {
//! let auth = AuthSession::new(Credential::long_lived("http://homeassistant.local:8123", "token"));
//! let conn = Connection::builder()
//!     .auth(Arc::new(auth))
//!     .setup_retry(SetupRetry::Limited(3))
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthSession;
use crate::error::{Error, Result};
use crate::transport::{
    Connector, DEFAULT_RETRY_INTERVAL, Handshake, SetupRetry, WebSocketConnector,
};

use super::core::Connection;

// ============================================================================
// Constants
// ============================================================================

/// Default reconnect backoff step.
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_secs(1);

/// Default number of steps before the backoff stops growing.
pub const DEFAULT_BACKOFF_MAX_STEPS: u32 = 5;

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Linear reconnect backoff, capped after `max_steps` steps.
///
/// Attempt `n` waits `min(n, max_steps) * step`. The first attempt after a
/// loss (attempt 0) runs immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay added per failed attempt.
    pub step: Duration,
    /// Attempt count at which the delay stops growing.
    pub max_steps: u32,
}

impl ReconnectPolicy {
    /// Creates a policy.
    #[inline]
    #[must_use]
    pub const fn new(step: Duration, max_steps: u32) -> Self {
        Self { step, max_steps }
    }

    /// Returns the delay before reconnect attempt `attempt`.
    #[inline]
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt.min(self.max_steps))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_STEP, DEFAULT_BACKOFF_MAX_STEPS)
    }
}

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Everything needed to establish a [`Connection`].
#[derive(Clone)]
pub struct ConnectionOptions {
    /// Authenticated session. Required.
    pub auth: Option<Arc<AuthSession>>,

    /// Channel factory.
    pub connector: Arc<dyn Connector>,

    /// Retry budget for the initial connection.
    pub setup_retry: SetupRetry,

    /// Delay between initial connection attempts.
    pub retry_interval: Duration,

    /// Backoff applied while reconnecting.
    pub reconnect: ReconnectPolicy,
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("auth", &self.auth)
            .field("setup_retry", &self.setup_retry)
            .field("retry_interval", &self.retry_interval)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auth: None,
            connector: Arc::new(WebSocketConnector::new()),
            setup_retry: SetupRetry::NONE,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ConnectionOptions {
    /// Builds the handshake these options describe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HostRequired`] if no auth session is set.
    pub(crate) fn handshake(&self) -> Result<Handshake> {
        let auth = self.auth.clone().ok_or(Error::HostRequired)?;
        Ok(Handshake::new(Arc::clone(&self.connector), auth)
            .with_retry_interval(self.retry_interval))
    }
}

// ============================================================================
// ConnectionBuilder
// ============================================================================

/// Fluent builder for [`Connection`].
///
/// Use [`Connection::builder()`] to create one.
#[derive(Debug, Clone, Default)]
pub struct ConnectionBuilder {
    options: ConnectionOptions,
}

impl ConnectionBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the authenticated session.
    #[inline]
    #[must_use]
    pub fn auth(mut self, auth: Arc<AuthSession>) -> Self {
        self.options.auth = Some(auth);
        self
    }

    /// Sets the channel factory.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.options.connector = connector;
        self
    }

    /// Sets the retry budget for the initial connection.
    #[inline]
    #[must_use]
    pub fn setup_retry(mut self, setup_retry: SetupRetry) -> Self {
        self.options.setup_retry = setup_retry;
        self
    }

    /// Sets the delay between initial connection attempts.
    #[inline]
    #[must_use]
    pub fn retry_interval(mut self, retry_interval: Duration) -> Self {
        self.options.retry_interval = retry_interval;
        self
    }

    /// Sets the reconnect backoff.
    #[inline]
    #[must_use]
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.options.reconnect = policy;
        self
    }

    /// Returns the options built so far.
    #[inline]
    #[must_use]
    pub fn into_options(self) -> ConnectionOptions {
        self.options
    }

    /// Connects with the configured options.
    ///
    /// # Errors
    ///
    /// See [`Connection::connect`].
    pub async fn connect(self) -> Result<Connection> {
        Connection::connect(self.options).await
    }
}

// ============================================================================
// Tests
// ============================================================================
