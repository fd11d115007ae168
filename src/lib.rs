//! Home Assistant WebSocket client runtime.
//!
//! Authenticates against a server, multiplexes commands and event
//! subscriptions over one socket, heals itself across drops, and keeps
//! shared, lazily subscribed caches of server state.
//!
//! # Architecture
//!
//! - **Transport**: a [`Connector`](transport::Connector) opens a text
//!   channel; the [`Handshake`](transport::Handshake) authenticates it
//! - **Connection**: one event loop task owns the channel and the
//!   correlation tables; [`Connection`] handles talk to it over a channel
//! - **Cache**: [`Collection`]s mirror server state into observable
//!   [`Store`]s while somebody listens
//!
//! Key design principles:
//!
//! - Command ids are allocated per socket; subscriptions keep a stable
//!   local [`SubscriptionId`] across reconnects
//! - Calls made while disconnected are queued and replayed in order
//! - Event-driven: no polling anywhere
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hass_socket::auth::{AuthSession, Credential};
//! use hass_socket::collections::subscribe_entities;
//! use hass_socket::{Connection, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let auth = AuthSession::new(Credential::long_lived("http://localhost:8123", "TOKEN"));
//!
//!     let conn = Connection::builder().auth(Arc::new(auth)).connect().await?;
//!     println!("Connected to {}", conn.ha_version());
//!
//!     let entities = subscribe_entities(&conn, |entities| {
//!         println!("{} entities", entities.len());
//!     })?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     entities.unsubscribe();
//!     conn.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`auth`] | Credentials and token refresh |
//! | [`cache`] | Collection lifecycle, stores, debouncing |
//! | [`collections`] | Built-in entity, config and service collections |
//! | [`connection`] | Multiplexed, self-healing [`Connection`] |
//! | [`entities`] | Entity model and diff reducers |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types |
//! | [`transport`] | Channels, connectors and the handshake |

// ============================================================================
// Modules
// ============================================================================

/// Credentials and token refresh.
pub mod auth;

/// Collection cache.
///
/// See [`Collection`] for the lifecycle.
pub mod cache;

/// Built-in collections.
pub mod collections;

/// Multiplexed connection.
///
/// Use [`Connection::builder()`] to connect.
pub mod connection;

/// Entity model and reducers.
pub mod entities;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing socket command ids with local
/// subscription and listener ids.
pub mod identifiers;

/// Wire protocol message types.
pub mod protocol;

/// Transport layer.
///
/// Connectors, the channel abstraction and the authentication handshake.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Auth types
pub use auth::{AuthSession, Credential, HttpTokenEndpoint, TokenEndpoint, TokenStore};

// Cache types
pub use cache::{Collection, CollectionOptions, CollectionSubscription, Store};

// Connection types
pub use connection::{
    Connection, ConnectionBuilder, ConnectionEvent, ConnectionOptions, ConnectionState,
    EventKind, ReconnectPolicy, SubscribeOptions, Subscription, WeakConnection,
};

// Entity types
pub use entities::{HassEntities, HassEntity};

// Error types
pub use error::{Error, ErrorCode, Result};

// Identifier types
pub use identifiers::{CommandId, ListenerId, SubscriptionId};

// Protocol types
pub use protocol::Command;

// Transport types
pub use transport::SetupRetry;
