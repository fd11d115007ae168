//! Subscription handles.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;

use super::event_loop::ConnectionCommand;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked with the `event` payload of every push event.
pub type EventCallback = Arc<dyn Fn(Value) + Send + Sync>;

// ============================================================================
// SubscribeOptions
// ============================================================================

/// Per-subscription behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Re-issue the subscription after a reconnect. Defaults to `true`.
    pub resubscribe: bool,
}

impl SubscribeOptions {
    /// Options for a subscription that does not survive a reconnect.
    #[inline]
    #[must_use]
    pub const fn once() -> Self {
        Self { resubscribe: false }
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self { resubscribe: true }
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Handle to an acknowledged subscription.
///
/// Dropping the handle does not unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe) or [`cancel`](Self::cancel). The handle
/// does not keep the connection alive.
#[derive(Debug)]
#[must_use = "dropping a Subscription keeps it active"]
pub struct Subscription {
    id: SubscriptionId,
    command_tx: mpsc::WeakUnboundedSender<ConnectionCommand>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        command_tx: mpsc::WeakUnboundedSender<ConnectionCommand>,
    ) -> Self {
        Self { id, command_tx }
    }

    /// Returns the local id of this subscription.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unsubscribes and waits for the server to confirm.
    ///
    /// While disconnected only local bookkeeping is removed and this returns
    /// immediately; the subscription is not replayed on reconnect.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionLost`] if the connection is gone
    /// - [`Error::Remote`] if the server rejects the unsubscribe
    pub async fn unsubscribe(self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .upgrade()
            .ok_or(Error::ConnectionLost)?
            .send(ConnectionCommand::Unsubscribe {
                id: self.id,
                reply: Some(reply_tx),
            })
            .map_err(|_| Error::ConnectionLost)?;

        reply_rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Unsubscribes without waiting for confirmation.
    pub fn cancel(self) {
        debug!(id = %self.id, "Cancelling subscription");
        if let Some(command_tx) = self.command_tx.upgrade() {
            let _ = command_tx.send(ConnectionCommand::Unsubscribe {
                id: self.id,
                reply: None,
            });
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
