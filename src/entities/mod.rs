//! Entity state model and reducers.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `legacy` | `get_states` / `state_changed` reducers |
//! | `projector` | [`project`] for compressed `subscribe_entities` diffs |
//! | `types` | [`HassEntity`] and the compressed wire format |

// ============================================================================
// Submodules
// ============================================================================

/// Legacy reducers.
pub mod legacy;

/// Compressed diff projection.
pub mod projector;

/// Entity types.
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use legacy::{apply_state_changed, entities_from_states};
pub use projector::{expand, from_epoch_seconds, project};
pub use types::{
    Attributes, CompressedAdd, CompressedRemove, CompressedState, CompressedStateDiff, Context,
    ContextRef, DiffEntry, EntityDiff, HassEntities, HassEntity, StateChangedData,
};
