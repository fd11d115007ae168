//! Observable state container.
//!
//! A [`Store`] holds an optional immutable snapshot. Every write replaces the
//! snapshot wholesale and notifies listeners in registration order. Listeners
//! run outside the lock and may read or write the store themselves.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::identifiers::ListenerId;

// ============================================================================
// Types
// ============================================================================

/// Store listener; receives the new snapshot.
pub type StoreListener<T> = Arc<dyn Fn(Arc<T>) + Send + Sync>;

// ============================================================================
// Store
// ============================================================================

/// Shared, observable snapshot of type `T`.
///
/// Cloning yields another handle to the same store.
pub struct Store<T> {
    inner: Arc<Mutex<StoreInner<T>>>,
}

struct StoreInner<T> {
    state: Option<Arc<T>>,
    listeners: Vec<(ListenerId, StoreListener<T>)>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                state: None,
                listeners: Vec::new(),
            })),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Store")
            .field("state", &inner.state)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

impl<T> Store<T> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `state`.
    #[must_use]
    pub fn with_state(state: T) -> Self {
        let store = Self::default();
        store.inner.lock().state = Some(Arc::new(state));
        store
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn state(&self) -> Option<Arc<T>> {
        self.inner.lock().state.clone()
    }

    /// Replaces the snapshot and notifies listeners.
    pub fn set_state(&self, state: T) {
        let state = Arc::new(state);
        let listeners = {
            let mut inner = self.inner.lock();
            inner.state = Some(Arc::clone(&state));
            inner.snapshot()
        };
        notify(&listeners, &state);
    }

    /// Derives the next snapshot from the current one.
    ///
    /// `action` returns `None` to leave the store untouched (no
    /// notification). It runs without the lock held, so it may read the
    /// store; if the store was written meanwhile it runs again against the
    /// newer snapshot. Returns whether the store changed.
    pub fn update<F>(&self, mut action: F) -> bool
    where
        F: FnMut(Option<&T>) -> Option<T>,
    {
        loop {
            let current = self.state();
            let Some(next) = action(current.as_deref()) else {
                return false;
            };
            let next = Arc::new(next);

            let listeners = {
                let mut inner = self.inner.lock();
                if !same_snapshot(inner.state.as_ref(), current.as_ref()) {
                    continue;
                }
                inner.state = Some(Arc::clone(&next));
                inner.snapshot()
            };
            notify(&listeners, &next);
            return true;
        }
    }

    /// Forgets the snapshot. Listeners are not notified.
    pub fn clear_state(&self) {
        self.inner.lock().state = None;
    }

    /// Registers a listener for future writes.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Arc<T>) + Send + Sync + 'static,
    {
        self.subscribe_arc(Arc::new(listener))
    }

    pub(crate) fn subscribe_arc(&self, listener: StoreListener<T>) -> ListenerId {
        let id = ListenerId::generate();
        self.inner.lock().listeners.push((id, listener));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(entry, _)| *entry != id);
        inner.listeners.len() != before
    }

    /// Returns `true` if `id` is registered.
    #[must_use]
    pub fn is_subscribed(&self, id: ListenerId) -> bool {
        self.inner.lock().listeners.iter().any(|(entry, _)| *entry == id)
    }
}

impl<T> StoreInner<T> {
    fn snapshot(&self) -> Vec<StoreListener<T>> {
        self.listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

fn same_snapshot<T>(a: Option<&Arc<T>>, b: Option<&Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

fn notify<T>(listeners: &[StoreListener<T>], state: &Arc<T>) {
    for listener in listeners {
        listener(Arc::clone(state));
    }
}

// ============================================================================
// Tests
// ============================================================================
