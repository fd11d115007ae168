//! Opaque bidirectional message channel.
//!
//! A [`Channel`] is a pair of text-frame queues. Whatever sits behind it (a
//! WebSocket pump task, an in-memory peer) owns the other ends. The channel
//! is closed when the inbound queue ends; it is never reopened, a reconnect
//! produces a new one.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Connector
// ============================================================================

/// Factory for raw channels (`createChannel`).
///
/// Implementations open the transport and return as soon as frames can flow.
/// Authentication is layered on top by the handshake.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new channel to `url`.
    async fn open(&self, url: &Url) -> Result<Channel>;
}

// ============================================================================
// Channel
// ============================================================================

/// An open text-frame channel.
#[derive(Debug)]
pub struct Channel {
    /// Outbound frames. `None` once closed locally.
    outbound: Option<mpsc::UnboundedSender<String>>,
    /// Inbound frames. Ends when the remote side is gone.
    inbound: mpsc::UnboundedReceiver<String>,
}

impl Channel {
    /// Wraps the local ends of a frame pipe.
    #[must_use]
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            outbound: Some(outbound),
            inbound,
        }
    }

    /// Returns `true` until the channel is closed locally or remotely.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] if the channel is closed.
    pub fn send(&self, frame: String) -> Result<()> {
        trace!(frame = %frame, "Sending frame");
        self.outbound
            .as_ref()
            .ok_or(Error::ConnectionLost)?
            .send(frame)
            .map_err(|_| Error::ConnectionLost)
    }

    /// Receives the next inbound frame, `None` once the channel has closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Closes the channel gracefully.
    ///
    /// Frames already received are still delivered by [`recv`](Self::recv)
    /// before it reports the end of the channel.
    pub fn close(&mut self) {
        self.outbound = None;
        self.inbound.close();
    }
}

// ============================================================================
// Tests
// ============================================================================
