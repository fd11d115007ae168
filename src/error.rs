//! Error types for the client runtime.
//!
//! This module defines all error types used throughout the crate, plus the
//! small integer [`ErrorCode`] tags surfaced at the public boundary.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use hass_socket::{Connection, Result, protocol::command};
//!
//! async fn example(conn: &Connection) -> Result<()> {
//!     let states = conn.call(command::get_states()).await?;
//!     println!("{states}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::HostRequired`], [`Error::CollectionType`] |
//! | Authentication | [`Error::InvalidAuth`], [`Error::NoRefreshToken`], [`Error::InvalidHttpsToHttp`], [`Error::InvalidAuthCallback`] |
//! | Connection | [`Error::CannotConnect`], [`Error::ConnectionLost`], [`Error::Connection`] |
//! | Protocol | [`Error::Protocol`] |
//! | Application | [`Error::Remote`] |
//! | External | [`Error::Json`], [`Error::WebSocket`], [`Error::Http`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// ErrorCode
// ============================================================================

/// Boundary error tag.
///
/// These are the stable codes reported to external listeners (for example in
/// a `reconnect-error` notification). They are plain tags, not error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// The channel could not be opened within the retry budget.
    CannotConnect = 1,
    /// The server rejected the credential.
    InvalidAuth = 2,
    /// The channel dropped while the operation was outstanding.
    ConnectionLost = 3,
    /// No server/auth information was configured.
    HostRequired = 4,
    /// A secure origin attempted to talk to a plain-http server.
    InvalidHttpsToHttp = 5,
    /// The authorization callback did not match the expected server.
    InvalidAuthCallback = 6,
}

impl ErrorCode {
    /// Returns the numeric value of the tag.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// No auth/server information supplied.
    #[error("Server host required")]
    HostRequired,

    /// A collection key was reused with a different value type.
    #[error("Collection {key} already registered with a different type")]
    CollectionType {
        /// The conflicting collection key.
        key: String,
    },

    // ========================================================================
    // Authentication Errors
    // ========================================================================
    /// Credential rejected, revoked or unusable.
    #[error("Invalid authentication: {message}")]
    InvalidAuth {
        /// Description of the rejection.
        message: String,
    },

    /// Refresh requested but the credential carries no refresh token.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Secure origin refused to send tokens to a plain-http server.
    #[error("Refusing to send tokens from https origin to http server")]
    InvalidHttpsToHttp,

    /// Authorization callback did not match the configured server.
    #[error("Invalid authorization callback")]
    InvalidAuthCallback,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Channel could not be established within the retry budget.
    #[error("Cannot connect to server")]
    CannotConnect,

    /// Channel lost while the operation was outstanding.
    #[error("Connection lost")]
    ConnectionLost,

    /// Transport-level failure with context.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Application Errors
    // ========================================================================
    /// The server answered a command with `success: false`.
    #[error("Remote error {code}: {message}")]
    Remote {
        /// Server-provided error code.
        code: String,
        /// Server-provided error message.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid auth error.
    #[inline]
    pub fn invalid_auth(message: impl Into<String>) -> Self {
        Self::InvalidAuth {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a remote (application) error.
    #[inline]
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a collection type mismatch error.
    #[inline]
    pub fn collection_type(key: impl Into<String>) -> Self {
        Self::CollectionType { key: key.into() }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns the boundary tag for this error, if it has one.
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::CannotConnect => Some(ErrorCode::CannotConnect),
            Self::InvalidAuth { .. } => Some(ErrorCode::InvalidAuth),
            Self::ConnectionLost => Some(ErrorCode::ConnectionLost),
            Self::HostRequired => Some(ErrorCode::HostRequired),
            Self::InvalidHttpsToHttp => Some(ErrorCode::InvalidHttpsToHttp),
            Self::InvalidAuthCallback => Some(ErrorCode::InvalidAuthCallback),
            _ => None,
        }
    }

    /// Returns `true` if this is an authentication error.
    #[inline]
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAuth { .. }
                | Self::NoRefreshToken
                | Self::InvalidHttpsToHttp
                | Self::InvalidAuthCallback
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::CannotConnect
                | Self::ConnectionLost
                | Self::Connection { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error may succeed on retry.
    ///
    /// Auth errors are never retried automatically.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.is_connection_error()
    }
}

// ============================================================================
// Tests
// ============================================================================
