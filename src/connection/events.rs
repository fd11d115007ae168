//! Connection notifications and their listener registry.
//!
//! | Event | Fired when |
//! |-------|------------|
//! | [`ConnectionEvent::Ready`] | A reconnect finished, subscriptions replayed |
//! | [`ConnectionEvent::Disconnected`] | The channel was lost (not after `close`) |
//! | [`ConnectionEvent::ReconnectError`] | Reconnecting stopped for good |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::ErrorCode;
use crate::identifiers::ListenerId;

// ============================================================================
// Types
// ============================================================================

/// Listener callback.
pub type EventListener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

// ============================================================================
// ConnectionEvent
// ============================================================================

/// Notification emitted to external listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Channel (re)established.
    Ready,
    /// Channel lost; reconnecting.
    Disconnected,
    /// Reconnecting failed irrecoverably.
    ReconnectError(ErrorCode),
}

impl ConnectionEvent {
    /// Returns the kind listeners register for.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Ready => EventKind::Ready,
            Self::Disconnected => EventKind::Disconnected,
            Self::ReconnectError(_) => EventKind::ReconnectError,
        }
    }
}

// ============================================================================
// EventKind
// ============================================================================

/// Notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `ready`
    Ready,
    /// `disconnected`
    Disconnected,
    /// `reconnect-error`
    ReconnectError,
}

impl EventKind {
    /// Returns the wire-style name of the kind.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::ReconnectError => "reconnect-error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// EventListeners
// ============================================================================

/// Ordered observer registry.
///
/// Firing works on a snapshot, so listeners may add or remove listeners
/// (including themselves) while being invoked.
#[derive(Default)]
pub(crate) struct EventListeners {
    entries: Vec<(ListenerId, EventKind, EventListener)>,
}

impl EventListeners {
    /// Registers `listener` for `kind`.
    pub fn add(&mut self, kind: EventKind, listener: EventListener) -> ListenerId {
        let id = ListenerId::generate();
        self.entries.push((id, kind, listener));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _, _)| *entry != id);
        self.entries.len() != before
    }

    /// Returns the listeners for `kind` in registration order.
    pub fn snapshot(&self, kind: EventKind) -> Vec<EventListener> {
        self.entries
            .iter()
            .filter(|(_, entry_kind, _)| *entry_kind == kind)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    #[test]
    fn test_event_kind() {
        assert_eq!(ConnectionEvent::Ready.kind(), EventKind::Ready);
        assert_eq!(
            ConnectionEvent::ReconnectError(ErrorCode::InvalidAuth).kind(),
            EventKind::ReconnectError
        );
        assert_eq!(EventKind::ReconnectError.to_string(), "reconnect-error");
    }

    #[test]
    fn test_snapshot_preserves_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut listeners = EventListeners::default();

        for tag in ["first", "second"] {
            let calls = Arc::clone(&calls);
            listeners.add(
                EventKind::Ready,
                Arc::new(move |_| calls.lock().push(tag)),
            );
        }
        listeners.add(EventKind::Disconnected, Arc::new(|_| {}));

        let snapshot = listeners.snapshot(EventKind::Ready);
        assert_eq!(snapshot.len(), 2);
        for listener in snapshot {
            listener(&ConnectionEvent::Ready);
        }
        assert_eq!(*calls.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_remove() {
        let mut listeners = EventListeners::default();
        let id = listeners.add(EventKind::Ready, Arc::new(|_| {}));
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        assert_eq!(listeners.len(), 0);
    }
}
