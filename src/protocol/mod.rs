//! Wire protocol message types.
//!
//! Text frames carrying JSON objects. Two phases:
//!
//! | Phase | Direction | Types |
//! |-------|-----------|-------|
//! | Handshake | Server → Client | `auth_required`, `auth_ok`, `auth_invalid` |
//! | Handshake | Client → Server | `auth` |
//! | Session | Client → Server | any command, carrying an integer `id` |
//! | Session | Server → Client | `result`, `event`, `pong` (single or batched) |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Outbound command envelope and builders |
//! | `handshake` | Authentication phase envelopes |
//! | `message` | Inbound correlated messages and batch parsing |
//! | `version` | Server version gate |

// ============================================================================
// Submodules
// ============================================================================

/// Outbound command envelope and builders.
pub mod command;

/// Authentication phase envelopes.
pub mod handshake;

/// Inbound correlated messages.
pub mod message;

/// Server version gate.
pub mod version;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::Command;
pub use handshake::{
    AuthMessage, HandshakeMessage, MSG_TYPE_AUTH_INVALID, MSG_TYPE_AUTH_OK,
    MSG_TYPE_AUTH_REQUIRED,
};
pub use message::{IncomingMessage, RemoteError, parse_batch};
pub use version::at_least_version;
