//! Authentication.
//!
//! The core only consumes an already-issued credential plus a way to refresh
//! it. The interactive login flow and token persistence live outside the
//! crate, behind [`TokenEndpoint`] and [`TokenStore`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `credential` | Bearer credential and WebSocket URL derivation |
//! | `endpoint` | HTTP implementation of [`TokenEndpoint`] |
//! | `session` | [`AuthSession`] with single-flight refresh |

// ============================================================================
// Submodules
// ============================================================================

/// Bearer credential.
pub mod credential;

/// HTTP token endpoint.
pub mod endpoint;

/// Authenticated session.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use credential::Credential;
pub use endpoint::HttpTokenEndpoint;
pub use session::{AuthSession, TokenEndpoint, TokenStore};
