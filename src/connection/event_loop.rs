//! Connection event loop.
//!
//! A single task owns the channel and every piece of multiplexer state. The
//! [`Connection`](super::Connection) handles talk to it through a command
//! queue, so the correlation tables are never touched concurrently.
//!
//! # Event Loop
//!
//! The task handles:
//!
//! - Commands from handles (calls, subscriptions, unsubscribes, lifecycle)
//! - Inbound frames (results, events, pongs; single or batched)
//! - The reconnect timer and the in-flight handshake
//! - The suspend signal gating the first reconnect attempt
//!
//! # Channel Loss
//!
//! On loss every one-shot call fails with [`Error::ConnectionLost`],
//! resubscribable subscriptions are carried over, and reconnect attempts are
//! scheduled with the configured backoff. After a successful reconnect the
//! carried subscriptions are replayed under fresh ids, then queued calls are
//! sent in the order they were issued.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::future::pending;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, ErrorCode, Result};
use crate::identifiers::{CommandId, SubscriptionId};
use crate::protocol::command::unsubscribe_events;
use crate::protocol::{Command, IncomingMessage, RemoteError, parse_batch};
use crate::transport::{AuthenticatedChannel, Channel, Handshake, SetupRetry};

use super::core::{ConnectionState, Shared};
use super::events::ConnectionEvent;
use super::options::ReconnectPolicy;
use super::subscription::EventCallback;

// ============================================================================
// Types
// ============================================================================

/// Reply slot for a one-shot call.
type CallReply = oneshot::Sender<Result<Value>>;

/// Reply slot for acknowledgements without payload.
type AckReply = oneshot::Sender<Result<()>>;

/// Outcome of a handshake task.
type AttemptResult = std::result::Result<Result<AuthenticatedChannel>, JoinError>;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
pub(crate) enum ConnectionCommand {
    /// Send a command and wait for its result.
    Call { command: Command, reply: CallReply },
    /// Send a command without tracking a reply.
    Send { command: Command },
    /// Register a subscription; `ack` settles with the first result.
    Subscribe {
        id: SubscriptionId,
        command: Command,
        callback: EventCallback,
        resubscribe: bool,
        ack: AckReply,
    },
    /// Drop a subscription.
    Unsubscribe {
        id: SubscriptionId,
        reply: Option<AckReply>,
    },
    /// Gate the next reconnect on `signal`.
    SuspendReconnectUntil { signal: BoxFuture<'static, ()> },
    /// Close the channel and wait for the suspend signal.
    Suspend { reply: AckReply },
    /// Drop the channel and reconnect.
    Reconnect { force: bool },
    /// Close for good.
    Close { reply: oneshot::Sender<()> },
}

// ============================================================================
// Internal State
// ============================================================================

/// A correlation entry, keyed by the wire id.
enum Pending {
    /// One-shot call (including pings).
    Call(CallReply),
    /// Live subscription. Stays registered after the first result.
    Subscription(SubscriptionId),
    /// Unsubscribe of `target`; the target entry is dropped on the result.
    Unsubscribe {
        target: CommandId,
        reply: Option<AckReply>,
    },
}

/// A logical subscription. Survives channel swaps.
struct SubscriptionEntry {
    command: Command,
    callback: EventCallback,
    resubscribe: bool,
    /// Wire id on the current channel, `None` while not sent.
    command_id: Option<CommandId>,
    /// Settled by the first result.
    ack: Option<AckReply>,
}

/// Work deferred while no channel is available.
enum Queued {
    Call {
        command: Command,
        reply: CallReply,
    },
    Send {
        command: Command,
    },
    Subscribe {
        id: SubscriptionId,
        entry: SubscriptionEntry,
    },
}

impl Queued {
    fn reject(self) {
        match self {
            Self::Call { reply, .. } => {
                let _ = reply.send(Err(Error::ConnectionLost));
            }
            Self::Send { .. } => {}
            Self::Subscribe { entry, .. } => entry.reject(),
        }
    }
}

impl SubscriptionEntry {
    fn reject(self) {
        if let Some(ack) = self.ack {
            let _ = ack.send(Err(Error::ConnectionLost));
        }
    }
}

/// Reconnect bookkeeping.
#[derive(Default)]
struct ReconnectState {
    /// Failed attempts since the last loss.
    attempt: u32,
    /// When the next attempt starts.
    at: Option<Instant>,
    /// Handshake in flight.
    connecting: Option<JoinHandle<Result<AuthenticatedChannel>>>,
    /// Armed signal, consumed by the next loss.
    suspend_signal: Option<BoxFuture<'static, ()>>,
    /// Signal currently holding back reconnection.
    suspended: Option<BoxFuture<'static, ()>>,
    /// Set after an irrecoverable reconnect failure.
    halted: bool,
}

/// Whether the loop keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

// ============================================================================
// EventLoop
// ============================================================================

/// Multiplexer task state.
pub(crate) struct EventLoop {
    shared: Arc<Shared>,
    handshake: Handshake,
    policy: ReconnectPolicy,
    command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    channel: Option<Channel>,
    next_id: CommandId,
    commands: FxHashMap<CommandId, Pending>,
    subscriptions: FxHashMap<SubscriptionId, SubscriptionEntry>,
    queue: VecDeque<Queued>,
    close_requested: bool,
    reconnect: ReconnectState,
}

impl EventLoop {
    /// Creates the loop around an authenticated channel.
    pub fn new(
        shared: Arc<Shared>,
        handshake: Handshake,
        policy: ReconnectPolicy,
        command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        channel: Channel,
    ) -> Self {
        Self {
            shared,
            handshake,
            policy,
            command_rx,
            channel: Some(channel),
            next_id: CommandId::FIRST,
            commands: FxHashMap::default(),
            subscriptions: FxHashMap::default(),
            queue: VecDeque::new(),
            close_requested: false,
            reconnect: ReconnectState::default(),
        }
    }

    /// Runs until closed or every handle is dropped.
    pub async fn run(mut self) {
        loop {
            let flow = tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All connection handles dropped");
                        self.shutdown();
                        Flow::Exit
                    }
                },

                frame = next_frame(&mut self.channel) => match frame {
                    Some(text) => {
                        self.handle_frame(&text);
                        Flow::Continue
                    }
                    None => self.handle_channel_lost(),
                },

                () = wait_until(self.reconnect.at) => {
                    self.reconnect.at = None;
                    self.start_attempt();
                    Flow::Continue
                }

                joined = join_attempt(&mut self.reconnect.connecting) => {
                    self.reconnect.connecting = None;
                    self.handle_attempt(joined);
                    Flow::Continue
                }

                () = wait_signal(&mut self.reconnect.suspended) => {
                    self.reconnect.suspended = None;
                    debug!("Suspend signal resolved, reconnecting");
                    self.schedule_attempt();
                    Flow::Continue
                }
            };

            if flow == Flow::Exit {
                break;
            }
        }

        debug!("Event loop terminated");
    }
}

// ============================================================================
// EventLoop - Commands
// ============================================================================

impl EventLoop {
    fn handle_command(&mut self, command: ConnectionCommand) -> Flow {
        match command {
            ConnectionCommand::Call { command, reply } => {
                if self.is_connected() {
                    self.dispatch_call(command, reply);
                } else {
                    self.enqueue(Queued::Call { command, reply });
                }
            }

            ConnectionCommand::Send { command } => {
                if self.is_connected() {
                    self.dispatch_send(&command);
                } else {
                    self.enqueue(Queued::Send { command });
                }
            }

            ConnectionCommand::Subscribe {
                id,
                command,
                callback,
                resubscribe,
                ack,
            } => {
                let entry = SubscriptionEntry {
                    command,
                    callback,
                    resubscribe,
                    command_id: None,
                    ack: Some(ack),
                };
                if self.is_connected() {
                    self.subscriptions.insert(id, entry);
                    self.send_subscription(id);
                } else {
                    self.enqueue(Queued::Subscribe { id, entry });
                }
            }

            ConnectionCommand::Unsubscribe { id, reply } => self.handle_unsubscribe(id, reply),

            ConnectionCommand::SuspendReconnectUntil { signal } => {
                debug!("Reconnect suspend signal armed");
                self.reconnect.suspend_signal = Some(signal);
            }

            ConnectionCommand::Suspend { reply } => {
                let result = if self.reconnect.suspend_signal.is_none() {
                    Err(Error::config("Suspend requires a suspend signal"))
                } else {
                    if let Some(channel) = self.channel.as_mut() {
                        debug!("Suspending connection");
                        channel.close();
                    }
                    Ok(())
                };
                let _ = reply.send(result);
            }

            ConnectionCommand::Reconnect { force } => return self.handle_reconnect(force),

            ConnectionCommand::Close { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return Flow::Exit;
            }
        }

        Flow::Continue
    }

    fn handle_unsubscribe(&mut self, id: SubscriptionId, reply: Option<AckReply>) {
        let Some(entry) = self.subscriptions.remove(&id) else {
            trace!(%id, "Unsubscribe for unknown subscription");
            settle(reply, Ok(()));
            return;
        };

        match entry.command_id {
            Some(target) if self.is_connected() => {
                let unsub_id = self.allocate_id();
                match unsubscribe_events(target).to_frame(unsub_id) {
                    Ok(frame) => {
                        debug!(%id, %target, "Unsubscribing");
                        self.commands
                            .insert(unsub_id, Pending::Unsubscribe { target, reply });
                        self.send_frame(frame);
                    }
                    Err(e) => {
                        self.commands.remove(&target);
                        settle(reply, Err(e));
                    }
                }
            }

            // Channel down: the entry is simply not replayed.
            command_id => {
                if let Some(target) = command_id {
                    self.commands.remove(&target);
                }
                debug!(%id, "Subscription removed locally");
                settle(reply, Ok(()));
            }
        }
    }

    fn handle_reconnect(&mut self, force: bool) -> Flow {
        if self.channel.is_some() && force {
            debug!("Forcing reconnect");
            // Dropped without a close handshake.
            self.channel = None;
            return self.handle_channel_lost();
        }

        if let Some(channel) = self.channel.as_mut() {
            debug!("Closing channel to reconnect");
            channel.close();
        } else if self.reconnect.connecting.is_none() && self.reconnect.suspended.is_none() {
            debug!("Reconnect requested while disconnected");
            self.reconnect.halted = false;
            self.reconnect.attempt = 0;
            self.reconnect.at = Some(Instant::now());
        }
        Flow::Continue
    }

    fn enqueue(&mut self, item: Queued) {
        if self.reconnect.halted {
            debug!("Reconnecting halted, rejecting call");
            item.reject();
            return;
        }
        trace!(queued = self.queue.len() + 1, "Queueing while disconnected");
        self.queue.push_back(item);
    }
}

// ============================================================================
// EventLoop - Outbound
// ============================================================================

impl EventLoop {
    fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(Channel::is_open)
    }

    fn allocate_id(&mut self) -> CommandId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    fn send_frame(&self, frame: String) {
        if let Some(channel) = &self.channel
            && let Err(e) = channel.send(frame)
        {
            // Loss is picked up by the inbound side.
            debug!(error = %e, "Send failed on closing channel");
        }
    }

    fn dispatch_call(&mut self, command: Command, reply: CallReply) {
        let id = self.allocate_id();
        match command.to_frame(id) {
            Ok(frame) => {
                self.commands.insert(id, Pending::Call(reply));
                self.send_frame(frame);
                trace!(%id, "Call sent");
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    fn dispatch_send(&mut self, command: &Command) {
        let id = self.allocate_id();
        match command.to_frame(id) {
            Ok(frame) => self.send_frame(frame),
            Err(e) => warn!(error = %e, "Dropping unserializable command"),
        }
    }

    fn send_subscription(&mut self, id: SubscriptionId) {
        let command_id = self.allocate_id();
        let frame = match self
            .subscriptions
            .get(&id)
            .map(|entry| entry.command.to_frame(command_id))
        {
            None => return,
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                if let Some(ack) = self.subscriptions.remove(&id).and_then(|entry| entry.ack) {
                    let _ = ack.send(Err(e));
                }
                return;
            }
        };

        if let Some(entry) = self.subscriptions.get_mut(&id) {
            entry.command_id = Some(command_id);
        }
        self.commands
            .insert(command_id, Pending::Subscription(id));
        self.send_frame(frame);
        trace!(%id, %command_id, "Subscription sent");
    }

    fn dispatch_queued(&mut self, item: Queued) {
        match item {
            Queued::Call { command, reply } => self.dispatch_call(command, reply),
            Queued::Send { command } => self.dispatch_send(&command),
            Queued::Subscribe { id, entry } => {
                self.subscriptions.insert(id, entry);
                self.send_subscription(id);
            }
        }
    }
}

// ============================================================================
// EventLoop - Inbound
// ============================================================================

impl EventLoop {
    fn handle_frame(&mut self, text: &str) {
        let messages = match parse_batch(text) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable frame");
                return;
            }
        };

        // Array order is dispatch order.
        for message in messages {
            match message {
                IncomingMessage::Event { id, event } => self.handle_event(id, event),
                IncomingMessage::Result {
                    id,
                    success,
                    result,
                    error,
                } => self.handle_result(id, success, result, error),
                IncomingMessage::Pong { id } => self.handle_pong(id),
                IncomingMessage::Unknown => trace!("Ignoring message of unknown type"),
            }
        }
    }

    fn handle_event(&mut self, id: CommandId, event: Value) {
        match self.commands.get(&id) {
            Some(Pending::Subscription(key)) => {
                if let Some(entry) = self.subscriptions.get(key) {
                    let callback = Arc::clone(&entry.callback);
                    callback(event);
                } else {
                    trace!(%id, "Event for subscription being removed");
                }
            }

            Some(_) => warn!(%id, "Event for a non-subscription command"),

            None => {
                warn!(%id, "Event for unknown subscription, unsubscribing");
                let unsub_id = self.allocate_id();
                if let Ok(frame) = unsubscribe_events(id).to_frame(unsub_id) {
                    self.commands.insert(
                        unsub_id,
                        Pending::Unsubscribe {
                            target: id,
                            reply: None,
                        },
                    );
                    self.send_frame(frame);
                }
            }
        }
    }

    fn handle_result(
        &mut self,
        id: CommandId,
        success: bool,
        result: Option<Value>,
        error: Option<RemoteError>,
    ) {
        let Some(pending) = self.commands.remove(&id) else {
            trace!(%id, "Result for untracked command");
            return;
        };

        let outcome = if success {
            Ok(result.unwrap_or(Value::Null))
        } else {
            Err(error.map_or_else(
                || Error::remote("unknown_error", "Command failed"),
                Error::from,
            ))
        };

        match pending {
            Pending::Call(reply) => {
                let _ = reply.send(outcome);
            }

            Pending::Subscription(key) => match outcome {
                Ok(_) => {
                    self.commands.insert(id, Pending::Subscription(key));
                    if let Some(ack) = self
                        .subscriptions
                        .get_mut(&key)
                        .and_then(|entry| entry.ack.take())
                    {
                        let _ = ack.send(Ok(()));
                    }
                }
                Err(e) => {
                    warn!(%id, error = %e, "Subscription rejected");
                    if let Some(ack) = self.subscriptions.remove(&key).and_then(|entry| entry.ack)
                    {
                        let _ = ack.send(Err(e));
                    }
                }
            },

            Pending::Unsubscribe { target, reply } => {
                self.commands.remove(&target);
                settle(reply, outcome.map(|_| ()));
            }
        }
    }

    fn handle_pong(&mut self, id: CommandId) {
        match self.commands.remove(&id) {
            Some(Pending::Call(reply)) => {
                let _ = reply.send(Ok(Value::Null));
            }
            Some(other) => {
                warn!(%id, "Pong for a non-call command");
                self.commands.insert(id, other);
            }
            None => trace!(%id, "Pong for untracked command"),
        }
    }
}

// ============================================================================
// EventLoop - Lifecycle
// ============================================================================

impl EventLoop {
    fn handle_channel_lost(&mut self) -> Flow {
        self.channel = None;

        if self.close_requested {
            self.shutdown();
            return Flow::Exit;
        }

        let mut failed = 0usize;
        for (_, pending) in self.commands.drain() {
            match pending {
                Pending::Call(reply) => {
                    let _ = reply.send(Err(Error::ConnectionLost));
                    failed += 1;
                }
                Pending::Unsubscribe { reply, .. } => settle(reply, Ok(())),
                Pending::Subscription(_) => {}
            }
        }

        let dropped: Vec<SubscriptionId> = self
            .subscriptions
            .iter()
            .filter(|(_, entry)| !entry.resubscribe)
            .map(|(id, _)| *id)
            .collect();
        for id in dropped {
            if let Some(entry) = self.subscriptions.remove(&id) {
                entry.reject();
            }
        }
        for entry in self.subscriptions.values_mut() {
            entry.command_id = None;
        }

        *self.shared.state.write() = ConnectionState::Disconnected;
        warn!(
            failed,
            carried = self.subscriptions.len(),
            "Connection lost"
        );
        self.shared.fire(&ConnectionEvent::Disconnected);

        self.reconnect.attempt = 0;
        if let Some(signal) = self.reconnect.suspend_signal.take() {
            debug!("Reconnect suspended until signal");
            self.reconnect.suspended = Some(signal);
        } else {
            self.schedule_attempt();
        }

        Flow::Continue
    }

    fn schedule_attempt(&mut self) {
        let delay = self.policy.delay(self.reconnect.attempt);
        debug!(
            attempt = self.reconnect.attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );
        self.reconnect.at = Some(Instant::now() + delay);
    }

    fn start_attempt(&mut self) {
        if self.close_requested || self.reconnect.connecting.is_some() {
            return;
        }
        let handshake = self.handshake.clone();
        self.reconnect.connecting = Some(tokio::spawn(async move {
            handshake.connect(SetupRetry::NONE).await
        }));
    }

    fn handle_attempt(&mut self, joined: AttemptResult) {
        match joined {
            Ok(Ok(authenticated)) => self.install(authenticated),

            Ok(Err(err)) if is_irrecoverable(&err) => {
                let code = err.code().unwrap_or(ErrorCode::InvalidAuth);
                error!(error = %err, "Reconnect failed irrecoverably");
                self.reconnect.halted = true;
                let rejected = self.queue.len();
                for item in self.queue.drain(..) {
                    item.reject();
                }
                debug!(rejected, "Rejected queued calls");
                self.shared.fire(&ConnectionEvent::ReconnectError(code));
            }

            Ok(Err(err)) => {
                self.reconnect.attempt = self.reconnect.attempt.saturating_add(1);
                info!(
                    attempt = self.reconnect.attempt,
                    error = %err,
                    "Reconnect attempt failed"
                );
                self.schedule_attempt();
            }

            Err(join_error) => {
                error!(error = %join_error, "Reconnect task failed");
                self.reconnect.attempt = self.reconnect.attempt.saturating_add(1);
                self.schedule_attempt();
            }
        }
    }

    fn install(&mut self, authenticated: AuthenticatedChannel) {
        let AuthenticatedChannel {
            channel,
            ha_version,
        } = authenticated;

        self.channel = Some(channel);
        self.next_id = CommandId::FIRST;
        self.reconnect.attempt = 0;
        self.reconnect.halted = false;
        *self.shared.ha_version.write() = ha_version;

        let mut replay: Vec<SubscriptionId> = self.subscriptions.keys().copied().collect();
        replay.sort_unstable();
        let replayed = replay.len();
        for id in replay {
            self.send_subscription(id);
        }

        let queued = std::mem::take(&mut self.queue);
        let drained = queued.len();
        for item in queued {
            self.dispatch_queued(item);
        }

        *self.shared.state.write() = ConnectionState::Connected;
        info!(replayed, drained, "Reconnected");
        self.shared.fire(&ConnectionEvent::Ready);
    }

    fn shutdown(&mut self) {
        self.close_requested = true;
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if let Some(task) = self.reconnect.connecting.take() {
            task.abort();
        }
        self.reconnect.at = None;
        self.reconnect.suspended = None;

        for (_, pending) in self.commands.drain() {
            match pending {
                Pending::Call(reply) => {
                    let _ = reply.send(Err(Error::ConnectionLost));
                }
                Pending::Unsubscribe { reply, .. } => settle(reply, Ok(())),
                Pending::Subscription(_) => {}
            }
        }
        for (_, entry) in self.subscriptions.drain() {
            entry.reject();
        }
        for item in self.queue.drain(..) {
            item.reject();
        }

        *self.shared.state.write() = ConnectionState::Closed;
        info!("Connection closed");
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn settle(reply: Option<AckReply>, result: Result<()>) {
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}

fn is_irrecoverable(err: &Error) -> bool {
    err.is_auth_error() || matches!(err, Error::HostRequired)
}

async fn next_frame(channel: &mut Option<Channel>) -> Option<String> {
    match channel {
        Some(channel) => channel.recv().await,
        None => pending().await,
    }
}

async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

async fn join_attempt(
    task: &mut Option<JoinHandle<Result<AuthenticatedChannel>>>,
) -> AttemptResult {
    match task {
        Some(task) => task.await,
        None => pending().await,
    }
}

async fn wait_signal(signal: &mut Option<BoxFuture<'static, ()>>) {
    match signal {
        Some(signal) => signal.as_mut().await,
        None => pending().await,
    }
}
