//! Entity model and the compressed diff wire format.

// ============================================================================
// Imports
// ============================================================================

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Types
// ============================================================================

/// Entity snapshot keyed by entity id.
pub type HassEntities = FxHashMap<String, HassEntity>;

/// Attribute map of an entity.
pub type Attributes = Map<String, Value>;

// ============================================================================
// HassEntity
// ============================================================================

/// Full state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HassEntity {
    /// Entity id, e.g. `light.kitchen`.
    pub entity_id: String,
    /// State string.
    pub state: String,
    /// Attributes.
    #[serde(default)]
    pub attributes: Attributes,
    /// Context of the last change.
    #[serde(default)]
    pub context: Context,
    /// When `state` last changed.
    pub last_changed: DateTime<Utc>,
    /// When the entity (state or attributes) last changed.
    pub last_updated: DateTime<Utc>,
}

/// Change context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Context id.
    pub id: String,
    /// Parent context id.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// User that caused the change.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Context {
    /// Context carrying only an id.
    #[must_use]
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            user_id: None,
        }
    }
}

// ============================================================================
// Compressed Wire Format
// ============================================================================

/// One `subscribe_entities` event.
///
/// | Key | Content |
/// |-----|---------|
/// | `a` | Added or replaced entities |
/// | `r` | Removed entity ids |
/// | `c` | Per-entity patches |
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EntityDiff {
    /// Additions.
    #[serde(default)]
    pub a: Option<FxHashMap<String, DiffEntry<CompressedState>>>,
    /// Removals.
    #[serde(default)]
    pub r: Option<Vec<DiffEntry<String>>>,
    /// Changes.
    #[serde(default)]
    pub c: Option<FxHashMap<String, DiffEntry<CompressedStateDiff>>>,
}

/// One entry of a diff section.
///
/// Entries that do not decode are kept as raw JSON so the rest of the diff
/// still applies.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DiffEntry<T> {
    /// Decoded entry.
    Valid(T),
    /// Entry that did not match the expected shape.
    Malformed(Value),
}

impl<T> DiffEntry<T> {
    /// Returns the decoded entry, if any.
    #[inline]
    #[must_use]
    pub fn valid(&self) -> Option<&T> {
        match self {
            Self::Valid(entry) => Some(entry),
            Self::Malformed(_) => None,
        }
    }
}

/// Compressed full entity state. Timestamps are epoch seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompressedState {
    /// State.
    pub s: String,
    /// Attributes.
    #[serde(default)]
    pub a: Attributes,
    /// Context id or full context.
    #[serde(default)]
    pub c: Option<ContextRef>,
    /// Last changed.
    pub lc: f64,
    /// Last updated, absent when equal to `lc`.
    #[serde(default)]
    pub lu: Option<f64>,
}

/// Context given either as a bare id or as an object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ContextRef {
    /// Bare id.
    Id(String),
    /// Full or partial context object.
    Fields(Map<String, Value>),
}

/// Patch for one entity.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CompressedStateDiff {
    /// Fields to set.
    #[serde(rename = "+", default)]
    pub add: Option<CompressedAdd>,
    /// Fields to remove.
    #[serde(rename = "-", default)]
    pub remove: Option<CompressedRemove>,
}

/// Fields set by a patch.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CompressedAdd {
    /// New state.
    #[serde(default)]
    pub s: Option<String>,
    /// Attributes to set (overwrite).
    #[serde(default)]
    pub a: Option<Attributes>,
    /// Context update.
    #[serde(default)]
    pub c: Option<ContextRef>,
    /// New last changed; also sets last updated.
    #[serde(default)]
    pub lc: Option<f64>,
    /// New last updated.
    #[serde(default)]
    pub lu: Option<f64>,
}

/// Fields removed by a patch.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CompressedRemove {
    /// Attribute keys to delete.
    #[serde(default)]
    pub a: Option<Vec<String>>,
}

// ============================================================================
// Legacy Event Format
// ============================================================================

/// `data` of a `state_changed` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateChangedData {
    /// Entity the change is about.
    pub entity_id: String,
    /// New state, `None` when the entity was removed.
    #[serde(default)]
    pub new_state: Option<HassEntity>,
}

// ============================================================================
// Tests
// ============================================================================
