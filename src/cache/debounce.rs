//! Trailing-edge debouncer.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::trace;

// ============================================================================
// Debouncer
// ============================================================================

/// Runs an action once a burst of calls has been quiet for `window`.
///
/// Each call restarts the window and replaces the pending action. An action
/// that already started is not cancelled.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Creates a debouncer with the given quiet window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(None),
        }
    }

    /// Returns the quiet window.
    #[inline]
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedules `action`, replacing any pending one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn call<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let window = self.window;
        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            trace!("Debounced call superseded");
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            sleep(window).await;
            tokio::spawn(action());
        }));
    }

    /// Drops the pending action, if any.
    pub fn cancel(&self) {
        if let Some(previous) = self.pending.lock().take() {
            previous.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ============================================================================
// Tests
// ============================================================================
