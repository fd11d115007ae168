//! Multiplexed connection.
//!
//! One [`Connection`] owns one authenticated channel at a time and multiplexes
//! calls and subscriptions over it.
//!
//! # State Machine
//!
//! ```text
//!            channel lost                    handshake ok
//! Connected ─────────────► Disconnected ──────────────────► Connected
//!     │                     │      ▲  transient failure
//!     │ close()             │      └──── (backoff) ───┘
//!     ▼                     │ close()
//!   Closed ◄────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`Connection`] handle |
//! | `event_loop` | Task owning the channel and correlation tables |
//! | `events` | `ready` / `disconnected` / `reconnect-error` notifications |
//! | `options` | [`ConnectionOptions`], [`ConnectionBuilder`], [`ReconnectPolicy`] |
//! | `subscription` | [`Subscription`] handles |

// ============================================================================
// Submodules
// ============================================================================

/// Connection handle.
pub mod core;

/// Event loop task.
mod event_loop;

/// Connection notifications.
pub mod events;

/// Configuration and builder.
pub mod options;

/// Subscription handles.
pub mod subscription;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{Connection, ConnectionState, WeakConnection};
pub use events::{ConnectionEvent, EventKind, EventListener};
pub use options::{ConnectionBuilder, ConnectionOptions, ReconnectPolicy};
pub use subscription::{EventCallback, SubscribeOptions, Subscription};
