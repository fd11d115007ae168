//! In-memory connector.
//!
//! Every [`Connector::open`] call on a [`MemoryConnector`] hands a
//! [`MemoryPeer`] to the paired [`MemoryListener`]. The peer plays the server:
//! it sees every frame the client sends and decides what to answer, and
//! dropping it closes the client's channel. Used to drive the connection
//! state machine without a network.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

use super::channel::{Channel, Connector};

// ============================================================================
// Constructor
// ============================================================================

/// Creates a connected connector/listener pair.
#[must_use]
pub fn memory_connector() -> (MemoryConnector, MemoryListener) {
    let (peers_tx, peers_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector { peers_tx },
        MemoryListener { peers_rx },
    )
}

// ============================================================================
// MemoryConnector
// ============================================================================

/// Client side of the in-memory transport.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    peers_tx: mpsc::UnboundedSender<MemoryPeer>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &Url) -> Result<Channel> {
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.clone(),
            to_client: Some(to_client_tx),
            from_client: from_client_rx,
        };

        self.peers_tx
            .send(peer)
            .map_err(|_| Error::connection("Connection refused: listener gone"))?;

        debug!(%url, "Memory channel opened");
        Ok(Channel::new(from_client_tx, to_client_rx))
    }
}

// ============================================================================
// MemoryListener
// ============================================================================

/// Server side: yields one peer per client connection attempt.
#[derive(Debug)]
pub struct MemoryListener {
    peers_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Waits for the next connection attempt.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers_rx.recv().await
    }

    /// Returns a pending connection attempt without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers_rx.try_recv().ok()
    }
}

// ============================================================================
// MemoryPeer
// ============================================================================

/// Server end of one in-memory channel.
#[derive(Debug)]
pub struct MemoryPeer {
    url: Url,
    to_client: Option<mpsc::UnboundedSender<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// URL the client dialed.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sends a raw text frame. Returns `false` if the client is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Sends a JSON frame. Returns `false` if the client is gone.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Receives the next raw frame from the client.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Receives the next frame from the client, parsed as JSON.
    ///
    /// Frames that are not JSON are skipped.
    pub async fn recv_json(&mut self) -> Option<Value> {
        loop {
            let text = self.from_client.recv().await?;
            if let Ok(value) = serde_json::from_str(&text) {
                return Some(value);
            }
        }
    }

    /// Returns a frame the client already sent, without waiting.
    pub fn try_recv_json(&mut self) -> Option<Value> {
        let text = self.from_client.try_recv().ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Closes the server side; the client observes a channel loss.
    pub fn close(&mut self) {
        self.to_client = None;
        self.from_client.close();
    }
}

// ============================================================================
// Tests
// ============================================================================
