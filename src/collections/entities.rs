//! Entity collection (`_ent`).
//!
//! Servers from 2022.4.0 push compressed diffs through `subscribe_entities`;
//! the first event carries every entity as additions, so no fetch is needed.
//! Older servers are read with `get_states` and followed through
//! `state_changed` events.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tracing::warn;

use crate::cache::{
    Collection, CollectionOptions, CollectionSubscription, FetchFn, Store, SubscribeUpdatesFn,
};
use crate::connection::{Connection, SubscribeOptions, Subscription};
use crate::entities::{
    EntityDiff, HassEntities, HassEntity, apply_state_changed, entities_from_states, project,
};
use crate::error::Result;
use crate::protocol::{at_least_version, command};

// ============================================================================
// Constants
// ============================================================================

/// Registry key.
pub const ENTITIES_KEY: &str = "_ent";

// ============================================================================
// Public API
// ============================================================================

/// Returns the entity collection of `conn`.
///
/// # Errors
///
/// Returns [`Error::CollectionType`](crate::Error::CollectionType) if the key
/// is taken by another type.
pub fn entities_collection(conn: &Connection) -> Result<Collection<HassEntities>> {
    if at_least_version(&conn.ha_version(), 2022, 4, Some(0)) {
        Collection::get(
            conn,
            ENTITIES_KEY,
            None,
            Some(subscribe_compressed()),
            CollectionOptions::default(),
        )
    } else {
        Collection::get(
            conn,
            ENTITIES_KEY,
            Some(legacy_fetch()),
            Some(legacy_subscribe()),
            CollectionOptions::default(),
        )
    }
}

/// Subscribes to the entity snapshot.
///
/// # Errors
///
/// See [`entities_collection`].
pub fn subscribe_entities<F>(
    conn: &Connection,
    on_change: F,
) -> Result<CollectionSubscription<HassEntities>>
where
    F: Fn(Arc<HassEntities>) + Send + Sync + 'static,
{
    Ok(entities_collection(conn)?.subscribe(on_change))
}

// ============================================================================
// Compressed Updates
// ============================================================================

fn subscribe_compressed() -> SubscribeUpdatesFn<HassEntities> {
    Arc::new(|conn: Connection, store: Store<HassEntities>| subscribe_diffs(conn, store).boxed())
}

async fn subscribe_diffs(conn: Connection, store: Store<HassEntities>) -> Result<Vec<Subscription>> {
    let subscription = conn
        .subscribe_message(
            command::subscribe_entities(),
            move |event| apply_diff(&store, event),
            SubscribeOptions::default(),
        )
        .await?;
    Ok(vec![subscription])
}

fn apply_diff(store: &Store<HassEntities>, event: Value) {
    let diff: EntityDiff = match serde_json::from_value(event) {
        Ok(diff) => diff,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed entity diff");
            return;
        }
    };

    store.update(|current| match current {
        Some(current) => Some(project(current, &diff)),
        None => Some(project(&HassEntities::default(), &diff)),
    });
}

// ============================================================================
// Legacy Updates
// ============================================================================

fn legacy_fetch() -> FetchFn<HassEntities> {
    Arc::new(|conn: Connection| fetch_states(conn).boxed())
}

async fn fetch_states(conn: Connection) -> Result<HassEntities> {
    let states: Vec<HassEntity> = conn.call_as(command::get_states()).await?;
    Ok(entities_from_states(states))
}

fn legacy_subscribe() -> SubscribeUpdatesFn<HassEntities> {
    Arc::new(|conn: Connection, store: Store<HassEntities>| subscribe_state_changed(conn, store).boxed())
}

async fn subscribe_state_changed(
    conn: Connection,
    store: Store<HassEntities>,
) -> Result<Vec<Subscription>> {
    let subscription = conn
        .subscribe_events(Some("state_changed"), move |event| {
            store.update(|current| apply_state_changed(current, &event));
        })
        .await?;
    Ok(vec![subscription])
}
