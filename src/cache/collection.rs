//! Reference-counted, lazily subscribed collections.
//!
//! A [`Collection`] mirrors one piece of server state into a [`Store`]. It
//! only talks to the server while somebody is listening:
//!
//! | Transition | Effect |
//! |------------|--------|
//! | 0 → 1 subscribers | Subscribe upstream, fetch, refetch on every `ready` |
//! | 0 → 1 within grace | Cancel the pending teardown, nothing else |
//! | 1 → 0 subscribers | Tear down after the grace period (or immediately) |
//! | `disconnected` during grace | Tear down immediately |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::connection::{Connection, EventKind, Subscription, WeakConnection};
use crate::error::{Error, Result};
use crate::identifiers::ListenerId;

use super::debounce::Debouncer;
use super::store::Store;

// ============================================================================
// Constants
// ============================================================================

/// Delay between the last subscriber leaving and the upstream teardown.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Window for coalescing refetches.
pub const DEFAULT_REFETCH_DEBOUNCE: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

/// Fetches the full collection value.
pub type FetchFn<T> = Arc<dyn Fn(Connection) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Establishes the upstream subscriptions that keep the store current.
pub type SubscribeUpdatesFn<T> =
    Arc<dyn Fn(Connection, Store<T>) -> BoxFuture<'static, Result<Vec<Subscription>>> + Send + Sync>;

// ============================================================================
// CollectionOptions
// ============================================================================

/// Collection lifecycle tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionOptions {
    /// Delay the teardown after the last subscriber leaves.
    pub unsub_grace: bool,
    /// Length of that delay.
    pub grace_period: Duration,
    /// Window used by [`Collection::refresh_debounced`].
    pub refetch_debounce: Duration,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            unsub_grace: true,
            grace_period: DEFAULT_GRACE_PERIOD,
            refetch_debounce: DEFAULT_REFETCH_DEBOUNCE,
        }
    }
}

// ============================================================================
// Collection
// ============================================================================

/// Handle to a cached collection. Cheap to clone.
pub struct Collection<T> {
    pub(crate) inner: Arc<CollectionInner<T>>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.inner.lifecycle.lock();
        f.debug_struct("Collection")
            .field("key", &self.inner.key)
            .field("active", &lifecycle.active)
            .field("upstream", &lifecycle.upstream_active)
            .finish_non_exhaustive()
    }
}

pub(crate) struct CollectionInner<T> {
    key: String,
    conn: WeakConnection,
    store: Store<T>,
    fetch: Option<FetchFn<T>>,
    subscribe_updates: Option<SubscribeUpdatesFn<T>>,
    options: CollectionOptions,
    debouncer: Debouncer,
    lifecycle: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    /// Local subscribers.
    active: usize,
    /// Bumped on every setup and teardown.
    generation: u64,
    /// Set between setup and teardown.
    upstream_active: bool,
    /// Upstream subscriptions of the current generation.
    upstream: Vec<Subscription>,
    /// Connection listeners registered by setup.
    listeners: Vec<ListenerId>,
    /// Pending teardown and its token.
    teardown: Option<(u64, JoinHandle<()>)>,
    /// Source of teardown tokens.
    next_token: u64,
}

/// Upstream resources taken out of a [`Lifecycle`] by a teardown.
struct Released {
    upstream: Vec<Subscription>,
    listeners: Vec<ListenerId>,
}

impl Lifecycle {
    /// Starts a new upstream generation.
    fn begin_setup(&mut self) -> u64 {
        self.generation += 1;
        self.upstream_active = true;
        self.generation
    }

    /// Ends the current generation and hands back what it holds.
    fn take_upstream(&mut self) -> Option<Released> {
        if !self.upstream_active {
            return None;
        }
        self.upstream_active = false;
        self.generation += 1;
        self.teardown = None;
        Some(Released {
            upstream: std::mem::take(&mut self.upstream),
            listeners: std::mem::take(&mut self.listeners),
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        self.upstream_active && self.generation == generation
    }
}

// ============================================================================
// Collection - Public API
// ============================================================================

impl<T: Send + Sync + 'static> Collection<T> {
    /// Returns the collection registered under `key` on `conn`, creating it
    /// if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CollectionType`] if `key` is registered with another
    /// value type.
    pub fn get(
        conn: &Connection,
        key: &str,
        fetch: Option<FetchFn<T>>,
        subscribe_updates: Option<SubscribeUpdatesFn<T>>,
        options: CollectionOptions,
    ) -> Result<Self> {
        conn.collections().get_or_insert_with(key, || Self {
            inner: Arc::new(CollectionInner {
                key: key.to_owned(),
                conn: conn.downgrade(),
                store: Store::new(),
                fetch,
                subscribe_updates,
                options,
                debouncer: Debouncer::new(options.refetch_debounce),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        })
    }

    /// Returns the registry key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Returns the cached value, `None` until fetched or after teardown.
    #[must_use]
    pub fn state(&self) -> Option<Arc<T>> {
        self.inner.store.state()
    }

    /// Returns the backing store.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Store<T> {
        &self.inner.store
    }

    /// Returns the number of local subscribers.
    #[must_use]
    pub fn active_subscribers(&self) -> usize {
        self.inner.lifecycle.lock().active
    }

    /// Returns `true` while upstream updates are set up.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.inner.lifecycle.lock().upstream_active
    }

    /// Fetches the collection and overwrites the cached value.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the collection has no fetch function
    /// - [`Error::ConnectionLost`] if the connection is gone
    /// - any error from the fetch
    pub async fn refresh(&self) -> Result<()> {
        self.inner.refresh().await
    }

    /// Schedules a refresh, coalescing bursts within the debounce window.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn refresh_debounced(&self) {
        let inner = Arc::clone(&self.inner);
        self.inner.debouncer.call(move || async move {
            if let Err(e) = inner.refresh().await {
                debug!(key = %inner.key, error = %e, "Debounced refresh failed");
            }
        });
    }

    /// Adds a local subscriber.
    ///
    /// The first subscriber brings the collection live. If a value is
    /// already cached, `callback` receives it on the next tick. Must be
    /// called from within a Tokio runtime.
    pub fn subscribe<F>(&self, callback: F) -> CollectionSubscription<T>
    where
        F: Fn(Arc<T>) + Send + Sync + 'static,
    {
        let setup = {
            let mut lifecycle = self.inner.lifecycle.lock();
            lifecycle.active += 1;
            trace!(key = %self.inner.key, active = lifecycle.active, "New collection subscriber");

            if lifecycle.active > 1 {
                None
            } else if let Some((_, timer)) = lifecycle.teardown.take() {
                debug!(key = %self.inner.key, "Prevented collection teardown");
                timer.abort();
                None
            } else if lifecycle.upstream_active {
                // Caught an immediate teardown before it ran; keep the upstream.
                None
            } else {
                Some(lifecycle.begin_setup())
            }
        };

        if let Some(generation) = setup {
            self.inner.setup(generation);
        }

        let callback: Arc<dyn Fn(Arc<T>) + Send + Sync> = Arc::new(callback);
        let listener = self.inner.store.subscribe_arc(Arc::clone(&callback));

        if let Some(state) = self.inner.store.state() {
            let store = self.inner.store.clone();
            tokio::spawn(async move {
                if store.is_subscribed(listener) {
                    callback(state);
                }
            });
        }

        CollectionSubscription {
            inner: Arc::clone(&self.inner),
            listener: Some(listener),
        }
    }
}

// ============================================================================
// CollectionSubscription
// ============================================================================

/// A local subscriber. Call [`unsubscribe`](Self::unsubscribe) to leave.
#[must_use = "dropping a CollectionSubscription keeps it subscribed"]
pub struct CollectionSubscription<T: Send + Sync + 'static> {
    inner: Arc<CollectionInner<T>>,
    listener: Option<ListenerId>,
}

impl<T: Send + Sync + 'static> CollectionSubscription<T> {
    /// Removes this subscriber. The last one out schedules the teardown.
    ///
    /// Must be called from within a Tokio runtime when grace is enabled.
    pub fn unsubscribe(mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        self.inner.store.unsubscribe(listener);

        let last = {
            let mut lifecycle = self.inner.lifecycle.lock();
            lifecycle.active = lifecycle.active.saturating_sub(1);
            trace!(key = %self.inner.key, active = lifecycle.active, "Collection subscriber left");
            lifecycle.active == 0
        };

        if last {
            if self.inner.options.unsub_grace {
                self.inner.schedule_teardown();
            } else {
                self.inner.teardown();
            }
        }
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for CollectionSubscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionSubscription")
            .field("key", &self.inner.key)
            .field("listener", &self.listener)
            .finish()
    }
}

// ============================================================================
// CollectionInner - Lifecycle
// ============================================================================

impl<T: Send + Sync + 'static> CollectionInner<T> {
    fn setup(self: &Arc<Self>, generation: u64) {
        let Some(conn) = self.conn.upgrade() else {
            warn!(key = %self.key, "Connection gone, collection stays idle");
            return;
        };

        debug!(key = %self.key, generation, "Subscribing collection");

        if let Some(subscribe_updates) = &self.subscribe_updates {
            let pending = subscribe_updates(conn.clone(), self.store.clone());
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                match pending.await {
                    Ok(subscriptions) => inner.install_upstream(generation, subscriptions),
                    Err(e) => warn!(key = %inner.key, error = %e, "Failed to subscribe to updates"),
                }
            });
        }

        let mut listeners = Vec::with_capacity(2);
        if self.fetch.is_some() {
            let weak = Arc::downgrade(self);
            listeners.push(conn.add_event_listener(EventKind::Ready, move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.spawn_refresh(generation);
                }
            }));
            self.spawn_refresh(generation);
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        listeners.push(conn.add_event_listener(EventKind::Disconnected, move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_disconnect();
            }
        }));

        let stale = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.is_current(generation) {
                lifecycle.listeners = listeners;
                None
            } else {
                Some(listeners)
            }
        };

        if let Some(listeners) = stale {
            debug!(key = %self.key, "Collection torn down during setup");
            for listener in listeners {
                conn.remove_event_listener(listener);
            }
        }
    }

    fn install_upstream(&self, generation: u64, subscriptions: Vec<Subscription>) {
        let stale = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.is_current(generation) {
                lifecycle.upstream.extend(subscriptions);
                None
            } else {
                Some(subscriptions)
            }
        };

        if let Some(subscriptions) = stale {
            debug!(key = %self.key, "Collection torn down before upstream was ready");
            for subscription in subscriptions {
                subscription.cancel();
            }
        }
    }

    fn schedule_teardown(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.options.grace_period;

        let mut lifecycle = self.lifecycle.lock();
        let token = lifecycle.next_token;
        lifecycle.next_token += 1;

        debug!(key = %self.key, grace_ms = period.as_millis() as u64, "Scheduling collection teardown");
        let timer = tokio::spawn(async move {
            sleep(period).await;
            if let Some(inner) = weak.upgrade() {
                inner.teardown_scheduled(token);
            }
        });
        lifecycle.teardown = Some((token, timer));
    }

    fn teardown_scheduled(&self, token: u64) {
        let released = {
            let mut lifecycle = self.lifecycle.lock();
            let due = lifecycle.active == 0
                && matches!(&lifecycle.teardown, Some((pending, _)) if *pending == token);
            if !due {
                return;
            }
            self.take_upstream(&mut lifecycle)
        };
        self.release(released);
    }

    fn handle_disconnect(&self) {
        let released = {
            let mut lifecycle = self.lifecycle.lock();
            let Some((_, timer)) = lifecycle.teardown.take() else {
                return;
            };
            debug!(key = %self.key, "Disconnected during grace period");
            timer.abort();
            self.take_upstream(&mut lifecycle)
        };
        self.release(released);
    }

    fn teardown(&self) {
        let released = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.active > 0 {
                return;
            }
            self.take_upstream(&mut lifecycle)
        };
        self.release(released);
    }

    /// Ends the generation under the caller's lock.
    ///
    /// The cached value goes with it, so a setup racing in right after
    /// starts from an empty store.
    fn take_upstream(&self, lifecycle: &mut Lifecycle) -> Option<Released> {
        let released = lifecycle.take_upstream()?;
        self.store.clear_state();
        Some(released)
    }

    fn release(&self, released: Option<Released>) {
        let Some(Released { upstream, listeners }) = released else {
            return;
        };

        debug!(key = %self.key, upstream = upstream.len(), "Tearing down collection");
        for subscription in upstream {
            subscription.cancel();
        }
        self.debouncer.cancel();

        if let Some(conn) = self.conn.upgrade() {
            for listener in listeners {
                conn.remove_event_listener(listener);
            }
        }
    }
}

// ============================================================================
// CollectionInner - Fetching
// ============================================================================

impl<T: Send + Sync + 'static> CollectionInner<T> {
    async fn fetch(&self) -> Result<T> {
        let fetch = self.fetch.as_ref().ok_or_else(|| {
            Error::config(format!("Collection {} does not support refresh", self.key))
        })?;
        let conn = self.conn.upgrade().ok_or(Error::ConnectionLost)?;
        fetch(conn).await
    }

    async fn refresh(&self) -> Result<()> {
        let state = self.fetch().await?;
        self.store.set_state(state);
        Ok(())
    }

    /// Refreshes in the background on behalf of `generation`.
    ///
    /// Errors while disconnected are expected and only traced.
    fn spawn_refresh(self: &Arc<Self>, generation: u64) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            match inner.fetch().await {
                Ok(state) => {
                    let current = inner.lifecycle.lock().is_current(generation);
                    if current {
                        inner.store.set_state(state);
                    } else {
                        trace!(key = %inner.key, "Discarding fetch for torn down collection");
                    }
                }
                Err(e) => {
                    let connected = inner.conn.upgrade().is_some_and(|c| c.is_connected());
                    if connected {
                        warn!(key = %inner.key, error = %e, "Collection fetch failed");
                    } else {
                        trace!(key = %inner.key, error = %e, "Collection fetch failed while disconnected");
                    }
                }
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_upstream_ends_generation() {
        let mut lifecycle = Lifecycle::default();
        let first = lifecycle.begin_setup();
        assert!(lifecycle.is_current(first));

        assert!(lifecycle.take_upstream().is_some());
        assert!(!lifecycle.upstream_active);
        assert!(!lifecycle.is_current(first));

        // A second teardown has nothing left to release.
        assert!(lifecycle.take_upstream().is_none());
    }

    #[test]
    fn test_setup_after_teardown_is_independent() {
        let mut lifecycle = Lifecycle::default();
        let first = lifecycle.begin_setup();
        lifecycle.listeners.push(ListenerId::generate());

        let released = lifecycle.take_upstream().expect("released");
        let second = lifecycle.begin_setup();

        assert_eq!(released.listeners.len(), 1);
        assert!(lifecycle.listeners.is_empty());
        assert!(lifecycle.is_current(second));
        assert!(!lifecycle.is_current(first));
    }
}
