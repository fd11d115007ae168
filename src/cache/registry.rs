//! Per-connection collection registry.

// ============================================================================
// Imports
// ============================================================================

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Error, Result};

use super::collection::{Collection, CollectionInner};

// ============================================================================
// CollectionRegistry
// ============================================================================

/// Keyed collections owned by one connection.
///
/// Each key maps to exactly one collection for the lifetime of the
/// connection; independent connections never share entries.
#[derive(Default)]
pub struct CollectionRegistry {
    entries: Mutex<FxHashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl fmt::Debug for CollectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("CollectionRegistry")
            .field("keys", &entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CollectionRegistry {
    /// Returns the collection under `key`, creating it with `create` if
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CollectionType`] if `key` holds a collection of a
    /// different value type.
    pub fn get_or_insert_with<T, F>(&self, key: &str, create: F) -> Result<Collection<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Collection<T>,
    {
        let mut entries = self.entries.lock();

        if let Some(existing) = entries.get(key) {
            return Arc::clone(existing)
                .downcast::<CollectionInner<T>>()
                .map(|inner| Collection { inner })
                .map_err(|_| Error::collection_type(key));
        }

        let collection = create();
        let erased: Arc<dyn Any + Send + Sync> = Arc::clone(&collection.inner) as _;
        entries.insert(key.to_owned(), erased);
        debug!(key, "Collection registered");
        Ok(collection)
    }

    /// Returns `true` if a collection is registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Returns the number of registered collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no collection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every entry.
    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}
