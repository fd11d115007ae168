//! WebSocket connector.
//!
//! Opens a client WebSocket and spawns a pump task bridging it to a
//! [`Channel`].
//!
//! # Pump Loop
//!
//! The pump handles:
//!
//! - Inbound text frames → channel inbound queue
//! - Channel outbound queue → WebSocket text frames
//! - Local close (outbound queue dropped) → WebSocket close frame
//! - Remote close / error → inbound queue ends

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace};
use url::Url;

use crate::error::Result;

use super::channel::{Channel, Connector};

// ============================================================================
// WebSocketConnector
// ============================================================================

/// [`Connector`] that dials a WebSocket endpoint (`ws://` or `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Creates a new connector.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &Url) -> Result<Channel> {
        debug!(%url, "Opening WebSocket");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;

        info!(%url, "WebSocket connection established");
        Ok(spawn_pump(ws_stream))
    }
}

// ============================================================================
// Pump
// ============================================================================

/// Spawns the pump task for `ws_stream` and returns the channel end.
pub(crate) fn spawn_pump<S>(ws_stream: WebSocketStream<S>) -> Channel
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    tokio::spawn(run_pump(ws_stream, outbound_rx, inbound_tx));

    Channel::new(outbound_tx, inbound_rx)
}

/// Pump loop that handles WebSocket I/O.
async fn run_pump<S>(
    ws_stream: WebSocketStream<S>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: mpsc::UnboundedSender<String>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            // Incoming frames from the server
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(text.to_string()).is_err() {
                            debug!("Channel dropped locally");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket closed by remote");
                        break;
                    }

                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break;
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }

                    // Ignore Binary, Ping, Pong
                    _ => {}
                }
            }

            // Outgoing frames from the connection
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
                            error!(error = %e, "Failed to send frame");
                            break;
                        }
                        trace!("Frame sent");
                    }

                    None => {
                        debug!("Channel closed locally");
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
        }
    }

    // Dropping inbound_tx ends the channel for the reader.
    debug!("Pump terminated");
}

// ============================================================================
// Tests
// ============================================================================
