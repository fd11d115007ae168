//! Folds compressed entity diffs onto a snapshot.

// ============================================================================
// Imports
// ============================================================================

use chrono::{DateTime, Utc};
use tracing::warn;

use super::types::{
    CompressedAdd, CompressedState, CompressedStateDiff, Context, ContextRef, DiffEntry,
    EntityDiff, HassEntities, HassEntity,
};

// ============================================================================
// Projection
// ============================================================================

/// Applies `diff` to `snapshot` and returns the next full snapshot.
///
/// Sections apply in order: additions, removals, changes. Removing an
/// unknown entity is a no-op; a change for an unknown entity is skipped
/// with a warning. Malformed entries are skipped individually.
#[must_use]
pub fn project(snapshot: &HassEntities, diff: &EntityDiff) -> HassEntities {
    let mut next = snapshot.clone();

    if let Some(additions) = &diff.a {
        for (entity_id, entry) in additions {
            match entry.valid() {
                Some(compressed) => {
                    next.insert(entity_id.clone(), expand(entity_id, compressed));
                }
                None => warn!(entity_id, "Skipping malformed entity addition"),
            }
        }
    }

    if let Some(removals) = &diff.r {
        for entity_id in removals.iter().filter_map(DiffEntry::valid) {
            next.remove(entity_id);
        }
    }

    if let Some(changes) = &diff.c {
        for (entity_id, entry) in changes {
            let Some(patch) = entry.valid() else {
                warn!(entity_id, "Skipping malformed entity change");
                continue;
            };
            match next.get_mut(entity_id) {
                Some(entity) => apply_patch(entity, patch),
                None => warn!(entity_id, "Received state update for unknown entity"),
            }
        }
    }

    next
}

/// Expands a compressed state into a full entity.
#[must_use]
pub fn expand(entity_id: &str, compressed: &CompressedState) -> HassEntity {
    let last_changed = from_epoch_seconds(compressed.lc);
    let last_updated = compressed.lu.map_or(last_changed, from_epoch_seconds);

    let context = match &compressed.c {
        Some(reference) => {
            let mut context = Context::default();
            merge_context(&mut context, reference);
            context
        }
        None => Context::default(),
    };

    HassEntity {
        entity_id: entity_id.to_owned(),
        state: compressed.s.clone(),
        attributes: compressed.a.clone(),
        context,
        last_changed,
        last_updated,
    }
}

fn apply_patch(entity: &mut HassEntity, patch: &CompressedStateDiff) {
    if let Some(add) = &patch.add {
        apply_add(entity, add);
    }

    if let Some(keys) = patch.remove.as_ref().and_then(|remove| remove.a.as_ref()) {
        for key in keys {
            entity.attributes.remove(key);
        }
    }
}

fn apply_add(entity: &mut HassEntity, add: &CompressedAdd) {
    if let Some(state) = &add.s {
        entity.state.clone_from(state);
    }

    if let Some(reference) = &add.c {
        merge_context(&mut entity.context, reference);
    }

    // A new last-changed implies a new last-updated.
    if let Some(lc) = add.lc {
        let at = from_epoch_seconds(lc);
        entity.last_changed = at;
        entity.last_updated = at;
    } else if let Some(lu) = add.lu {
        entity.last_updated = from_epoch_seconds(lu);
    }

    if let Some(attributes) = &add.a {
        for (key, value) in attributes {
            entity.attributes.insert(key.clone(), value.clone());
        }
    }
}

fn merge_context(context: &mut Context, reference: &ContextRef) {
    match reference {
        ContextRef::Id(id) => context.id.clone_from(id),
        ContextRef::Fields(fields) => {
            for (key, value) in fields {
                let text = value.as_str().map(str::to_owned);
                match key.as_str() {
                    "id" => context.id = text.unwrap_or_default(),
                    "parent_id" => context.parent_id = text,
                    "user_id" => context.user_id = text,
                    _ => {}
                }
            }
        }
    }
}

/// Converts epoch seconds (with fraction) to a timestamp at millisecond
/// precision.
#[must_use]
pub fn from_epoch_seconds(seconds: f64) -> DateTime<Utc> {
    let millis = (seconds * 1000.0) as i64;
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================
