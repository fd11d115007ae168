//! Entity tracking for servers without `subscribe_entities`.
//!
//! The snapshot is built from `get_states` and kept current with
//! `state_changed` events carrying full states.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tracing::warn;

use super::types::{HassEntities, HassEntity, StateChangedData};

// ============================================================================
// Reducers
// ============================================================================

/// Builds a snapshot from a `get_states` result.
#[must_use]
pub fn entities_from_states(states: Vec<HassEntity>) -> HassEntities {
    states
        .into_iter()
        .map(|entity| (entity.entity_id.clone(), entity))
        .collect()
}

/// Applies a `state_changed` event (the full event object).
///
/// Returns `None` when there is nothing to do: no snapshot yet, or an event
/// that does not decode.
#[must_use]
pub fn apply_state_changed(snapshot: Option<&HassEntities>, event: &Value) -> Option<HassEntities> {
    let snapshot = snapshot?;

    let data = match parse_data(event) {
        Ok(data) => data,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed state_changed event");
            return None;
        }
    };

    let mut next = snapshot.clone();
    match data.new_state {
        Some(new_state) => {
            next.insert(new_state.entity_id.clone(), new_state);
        }
        None => {
            next.remove(&data.entity_id);
        }
    }
    Some(next)
}

fn parse_data(event: &Value) -> serde_json::Result<StateChangedData> {
    serde_json::from_value(event.get("data").cloned().unwrap_or(Value::Null))
}

// ============================================================================
// Tests
// ============================================================================
