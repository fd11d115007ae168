//! Channel transport layer.
//!
//! This module opens raw text-frame channels to the server and turns them
//! into authenticated channels the connection can multiplex over.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Connection     │                              │  Server         │
//! │                 │         WebSocket            │                 │
//! │  Handshake      │◄────────────────────────────►│  /api/websocket │
//! │  → Channel      │      ws:// or wss://         │                 │
//! │                 │                              │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connector::open` - Open a raw [`Channel`]
//! 2. `Handshake::connect` - Authenticate, retrying per [`SetupRetry`]
//! 3. [`AuthenticatedChannel`] - Handed to the connection event loop
//! 4. `Channel::close` - Closed on shutdown, replaced wholesale on reconnect
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | Channel and the `Connector` factory trait |
//! | `handshake` | Authentication exchange and setup retries |
//! | `memory` | In-memory connector for driving a connection without a network |
//! | `websocket` | WebSocket connector and pump task |

// ============================================================================
// Submodules
// ============================================================================

/// Channel and connector trait.
pub mod channel;

/// Authentication exchange.
pub mod handshake;

/// In-memory connector.
pub mod memory;

/// WebSocket connector.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{Channel, Connector};
pub use handshake::{AuthenticatedChannel, DEFAULT_RETRY_INTERVAL, Handshake, SetupRetry};
pub use memory::{MemoryConnector, MemoryListener, MemoryPeer, memory_connector};
pub use websocket::WebSocketConnector;
