//! Core configuration collection (`_cnf`).

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::cache::{
    Collection, CollectionOptions, CollectionSubscription, FetchFn, Store, SubscribeUpdatesFn,
};
use crate::connection::{Connection, Subscription};
use crate::error::Result;
use crate::protocol::command;

// ============================================================================
// Constants
// ============================================================================

/// Registry key.
pub const CONFIG_KEY: &str = "_cnf";

// ============================================================================
// HassConfig
// ============================================================================

/// Server core configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HassConfig {
    /// Loaded integrations.
    #[serde(default)]
    pub components: Vec<String>,
    /// Location name.
    #[serde(default)]
    pub location_name: Option<String>,
    /// Time zone.
    #[serde(default)]
    pub time_zone: Option<String>,
    /// Server version.
    #[serde(default)]
    pub version: Option<String>,
    /// Run state (`RUNNING`, `STARTING`, ...).
    #[serde(default)]
    pub state: Option<String>,
    /// Everything else.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HassConfig {
    /// Returns a copy with `component` appended, as after `component_loaded`.
    #[must_use]
    pub fn with_component(&self, component: &str) -> Self {
        let mut next = self.clone();
        next.components.push(component.to_owned());
        next
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Returns the config collection of `conn`.
///
/// # Errors
///
/// Returns [`Error::CollectionType`](crate::Error::CollectionType) if the key
/// is taken by another type.
pub fn config_collection(conn: &Connection) -> Result<Collection<HassConfig>> {
    Collection::get(
        conn,
        CONFIG_KEY,
        Some(fetch_config()),
        Some(subscribe_updates()),
        CollectionOptions::default(),
    )
}

/// Subscribes to the core configuration.
///
/// # Errors
///
/// See [`config_collection`].
pub fn subscribe_config<F>(conn: &Connection, on_change: F) -> Result<CollectionSubscription<HassConfig>>
where
    F: Fn(Arc<HassConfig>) + Send + Sync + 'static,
{
    Ok(config_collection(conn)?.subscribe(on_change))
}

// ============================================================================
// Collection Functions
// ============================================================================

fn fetch_config() -> FetchFn<HassConfig> {
    Arc::new(|conn: Connection| get_config(conn).boxed())
}

async fn get_config(conn: Connection) -> Result<HassConfig> {
    conn.call_as(command::get_config()).await
}

fn subscribe_updates() -> SubscribeUpdatesFn<HassConfig> {
    Arc::new(|conn: Connection, store: Store<HassConfig>| subscribe_config_events(conn, store).boxed())
}

async fn subscribe_config_events(
    conn: Connection,
    store: Store<HassConfig>,
) -> Result<Vec<Subscription>> {
    let loaded_store = store.clone();
    let component_loaded = conn
        .subscribe_events(Some("component_loaded"), move |event| {
            let Some(component) = event.pointer("/data/component").and_then(Value::as_str) else {
                return;
            };
            loaded_store.update(|current| current.map(|c| c.with_component(component)));
        })
        .await?;

    let weak = conn.downgrade();
    let config_updated = match conn
        .subscribe_events(Some("core_config_updated"), move |_| {
            let Some(conn) = weak.upgrade() else {
                return;
            };
            let store = store.clone();
            tokio::spawn(async move {
                match get_config(conn).await {
                    Ok(config) => store.set_state(config),
                    Err(e) => debug!(error = %e, "Config refetch failed"),
                }
            });
        })
        .await
    {
        Ok(subscription) => subscription,
        Err(e) => {
            component_loaded.cancel();
            return Err(e);
        }
    };

    Ok(vec![component_loaded, config_updated])
}

// ============================================================================
// Tests
// ============================================================================
