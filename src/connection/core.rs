//! Connection handle.
//!
//! [`Connection`] is a cheap, cloneable handle to one multiplexed channel.
//! All operations are forwarded to the event loop task; the handle itself
//! only reads shared state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::cache::CollectionRegistry;
use crate::error::{Error, Result};
use crate::identifiers::{ListenerId, SubscriptionId};
use crate::protocol::Command;
use crate::protocol::command;

use super::event_loop::{ConnectionCommand, EventLoop};
use super::events::{ConnectionEvent, EventKind, EventListeners};
use super::options::{ConnectionBuilder, ConnectionOptions};
use super::subscription::{EventCallback, SubscribeOptions, Subscription};

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A channel is open.
    Connected,
    /// The channel was lost; reconnecting.
    Disconnected,
    /// Closed for good.
    Closed,
}

// ============================================================================
// Shared
// ============================================================================

/// State readable from every handle, written by the event loop.
pub(crate) struct Shared {
    pub state: RwLock<ConnectionState>,
    pub ha_version: RwLock<String>,
    pub listeners: Mutex<EventListeners>,
    pub collections: CollectionRegistry,
}

impl Shared {
    fn new(ha_version: String) -> Self {
        Self {
            state: RwLock::new(ConnectionState::Connected),
            ha_version: RwLock::new(ha_version),
            listeners: Mutex::new(EventListeners::default()),
            collections: CollectionRegistry::default(),
        }
    }

    /// Invokes every listener for the event, in registration order.
    pub fn fire(&self, event: &ConnectionEvent) {
        let listeners = self.listeners.lock().snapshot(event.kind());
        debug!(event = %event.kind(), listeners = listeners.len(), "Firing event");
        for listener in listeners {
            listener(event);
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Multiplexed, self-healing connection.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone. Clones share the same
/// channel, subscriptions and collections.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// State shared with the event loop.
    shared: Arc<Shared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("ha_version", &self.ha_version())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Constructors
// ============================================================================

impl Connection {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Establishes an authenticated connection.
    ///
    /// # Errors
    ///
    /// - [`Error::HostRequired`] if no auth session is configured
    /// - [`Error::InvalidAuth`] if the server rejects the credential
    /// - [`Error::CannotConnect`] if the setup retry budget is exhausted
    pub async fn connect(options: ConnectionOptions) -> Result<Self> {
        let handshake = options.handshake()?;
        let authenticated = handshake.connect(options.setup_retry).await?;

        let shared = Arc::new(Shared::new(authenticated.ha_version));
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let event_loop = EventLoop::new(
            Arc::clone(&shared),
            handshake,
            options.reconnect,
            command_rx,
            authenticated.channel,
        );
        tokio::spawn(event_loop.run());

        info!(ha_version = %shared.ha_version.read(), "Connection established");
        Ok(Self { command_tx, shared })
    }
}

// ============================================================================
// Connection - State
// ============================================================================

impl Connection {
    /// Returns the lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Returns `true` while a channel is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the server version reported by the last handshake.
    #[must_use]
    pub fn ha_version(&self) -> String {
        self.shared.ha_version.read().clone()
    }

    /// Returns the collections attached to this connection.
    #[inline]
    #[must_use]
    pub fn collections(&self) -> &CollectionRegistry {
        &self.shared.collections
    }

    /// Returns a handle that does not keep the connection alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            command_tx: self.command_tx.downgrade(),
            shared: Arc::downgrade(&self.shared),
        }
    }
}

// ============================================================================
// Connection - Commands
// ============================================================================

impl Connection {
    /// Sends a command and waits for its result.
    ///
    /// While disconnected the command is queued and sent after reconnecting.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the server answers with `success: false`
    /// - [`Error::ConnectionLost`] if the channel drops before the result
    ///   arrives, or the connection is closed
    pub async fn call(&self, command: Command) -> Result<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(ConnectionCommand::Call {
            command,
            reply: reply_tx,
        })?;
        reply_rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Sends a command and deserializes its result.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call); additionally [`Error::Json`] if the result
    /// does not match `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, command: Command) -> Result<T> {
        let value = self.call(command).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Sends a command without waiting for a result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] if the connection is closed.
    pub fn send(&self, command: Command) -> Result<()> {
        self.dispatch(ConnectionCommand::Send { command })
    }

    /// Sends a keepalive ping and waits for the pong.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] if the channel drops first.
    pub async fn ping(&self) -> Result<()> {
        self.call(command::ping()).await.map(|_| ())
    }

    /// Subscribes with an arbitrary command.
    ///
    /// Resolves once the server acknowledges the subscription. `callback`
    /// receives the `event` payload of every push event, in order.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] if the server rejects the subscription
    /// - [`Error::ConnectionLost`] if the connection is closed
    pub async fn subscribe_message<F>(
        &self,
        command: Command,
        callback: F,
        options: SubscribeOptions,
    ) -> Result<Subscription>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe_with(command, Arc::new(callback), options)
            .await
    }

    /// Subscribes to server events, optionally filtered by type.
    ///
    /// # Errors
    ///
    /// See [`subscribe_message`](Self::subscribe_message).
    pub async fn subscribe_events<F>(
        &self,
        event_type: Option<&str>,
        callback: F,
    ) -> Result<Subscription>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe_message(
            command::subscribe_events(event_type),
            callback,
            SubscribeOptions::default(),
        )
        .await
    }

    pub(crate) async fn subscribe_with(
        &self,
        command: Command,
        callback: EventCallback,
        options: SubscribeOptions,
    ) -> Result<Subscription> {
        let id = SubscriptionId::generate();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.dispatch(ConnectionCommand::Subscribe {
            id,
            command,
            callback,
            resubscribe: options.resubscribe,
            ack: ack_tx,
        })?;

        ack_rx.await.map_err(|_| Error::ConnectionLost)??;
        Ok(Subscription::new(id, self.command_tx.downgrade()))
    }

    fn dispatch(&self, command: ConnectionCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::ConnectionLost)
    }
}

// ============================================================================
// Connection - Notifications
// ============================================================================

impl Connection {
    /// Registers a listener for a notification kind.
    pub fn add_event_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.lock().add(kind, Arc::new(listener))
    }

    /// Removes a listener. Safe to call from inside a listener.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.lock().remove(id)
    }
}

// ============================================================================
// Connection - Lifecycle
// ============================================================================

impl Connection {
    /// Holds back the next reconnect until `signal` resolves.
    ///
    /// Calls issued meanwhile are queued and sent once reconnected.
    pub fn suspend_reconnect_until<F>(&self, signal: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self.dispatch(ConnectionCommand::SuspendReconnectUntil {
            signal: Box::pin(signal),
        });
    }

    /// Closes the channel and waits for the suspend signal to reconnect.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no suspend signal was set with
    ///   [`suspend_reconnect_until`](Self::suspend_reconnect_until)
    /// - [`Error::ConnectionLost`] if the connection is closed
    pub async fn suspend(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(ConnectionCommand::Suspend { reply: reply_tx })?;
        reply_rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Reconnects.
    ///
    /// With `force` the channel is dropped without a close handshake, for a
    /// transport known to be stuck. Otherwise it is closed gracefully and the
    /// loss handler reconnects. While disconnected this restarts attempts
    /// immediately, also after an irrecoverable failure.
    pub fn reconnect(&self, force: bool) {
        let _ = self.dispatch(ConnectionCommand::Reconnect { force });
    }

    /// Closes the connection for good.
    ///
    /// Outstanding calls fail with [`Error::ConnectionLost`] and no
    /// `disconnected` notification is fired.
    pub async fn close(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .dispatch(ConnectionCommand::Close { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.await;
        }
        self.shared.collections.clear();
    }
}

// ============================================================================
// WeakConnection
// ============================================================================

/// Non-owning [`Connection`] handle.
#[derive(Clone)]
pub struct WeakConnection {
    command_tx: mpsc::WeakUnboundedSender<ConnectionCommand>,
    shared: Weak<Shared>,
}

impl WeakConnection {
    /// Returns the connection if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Connection> {
        Some(Connection {
            command_tx: self.command_tx.upgrade()?,
            shared: self.shared.upgrade()?,
        })
    }
}

impl fmt::Debug for WeakConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConnection").finish_non_exhaustive()
    }
}
