//! Collection cache.
//!
//! Derived views of server state, shared by every local consumer of one
//! connection and kept current only while someone is subscribed.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `collection` | [`Collection`] lifecycle (subscribe, grace, refresh) |
//! | `debounce` | Trailing-edge [`Debouncer`] for refetch storms |
//! | `registry` | Per-connection [`CollectionRegistry`] |
//! | `store` | Observable [`Store`] snapshot container |

// ============================================================================
// Submodules
// ============================================================================

/// Collection lifecycle.
pub mod collection;

/// Debouncer.
pub mod debounce;

/// Collection registry.
pub mod registry;

/// Observable store.
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use collection::{
    Collection, CollectionOptions, CollectionSubscription, DEFAULT_GRACE_PERIOD,
    DEFAULT_REFETCH_DEBOUNCE, FetchFn, SubscribeUpdatesFn,
};
pub use debounce::Debouncer;
pub use registry::CollectionRegistry;
pub use store::{Store, StoreListener};
