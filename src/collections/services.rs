//! Service catalogue collection (`_srv`).

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::FutureExt;
use rustc_hash::FxHashMap;
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
pub const SERVICES_KEY: &str = "_srv";

// ============================================================================
// Types
// ============================================================================

/// One service description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HassService {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Field schema by field name.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Everything else (`target`, `response`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Services of one domain, by service name.
pub type HassDomainServices = FxHashMap<String, HassService>;

/// Services by domain.
pub type HassServices = FxHashMap<String, HassDomainServices>;

// ============================================================================
// Reducers
// ============================================================================

/// Adds a placeholder for a newly registered service.
///
/// Returns `None` if there is no snapshot or the service is already known.
#[must_use]
pub fn register_service(
    services: Option<&HassServices>,
    domain: &str,
    service: &str,
) -> Option<HassServices> {
    let services = services?;
    if services.get(domain).is_some_and(|d| d.contains_key(service)) {
        return None;
    }

    let mut next = services.clone();
    next.entry(domain.to_owned())
        .or_default()
        .insert(service.to_owned(), HassService::default());
    Some(next)
}

/// Drops a removed service.
///
/// Returns `None` if there is no snapshot or the service is unknown.
#[must_use]
pub fn remove_service(
    services: Option<&HassServices>,
    domain: &str,
    service: &str,
) -> Option<HassServices> {
    let services = services?;
    if !services.get(domain).is_some_and(|d| d.contains_key(service)) {
        return None;
    }

    let mut next = services.clone();
    if let Some(domain_services) = next.get_mut(domain) {
        domain_services.remove(service);
    }
    Some(next)
}

// ============================================================================
// Public API
// ============================================================================

/// Returns the services collection of `conn`.
///
/// # Errors
///
/// Returns [`Error::CollectionType`](crate::Error::CollectionType) if the key
/// is taken by another type.
pub fn services_collection(conn: &Connection) -> Result<Collection<HassServices>> {
    Collection::get(
        conn,
        SERVICES_KEY,
        Some(fetch_services()),
        Some(subscribe_updates()),
        CollectionOptions::default(),
    )
}

/// Subscribes to the service catalogue.
///
/// # Errors
///
/// See [`services_collection`].
pub fn subscribe_services<F>(
    conn: &Connection,
    on_change: F,
) -> Result<CollectionSubscription<HassServices>>
where
    F: Fn(Arc<HassServices>) + Send + Sync + 'static,
{
    Ok(services_collection(conn)?.subscribe(on_change))
}

// ============================================================================
// Collection Functions
// ============================================================================

fn fetch_services() -> FetchFn<HassServices> {
    Arc::new(|conn: Connection| get_services(conn).boxed())
}

async fn get_services(conn: Connection) -> Result<HassServices> {
    conn.call_as(command::get_services()).await
}

fn service_ref(event: &Value) -> Option<(String, String)> {
    let domain = event.pointer("/data/domain")?.as_str()?;
    let service = event.pointer("/data/service")?.as_str()?;
    Some((domain.to_owned(), service.to_owned()))
}

fn subscribe_updates() -> SubscribeUpdatesFn<HassServices> {
    Arc::new(|conn: Connection, store: Store<HassServices>| subscribe_service_events(conn, store).boxed())
}

async fn subscribe_service_events(
    conn: Connection,
    store: Store<HassServices>,
) -> Result<Vec<Subscription>> {
    let registered_store = store.clone();
    let weak = conn.downgrade();
    let registered = conn
        .subscribe_events(Some("service_registered"), move |event| {
            let Some((domain, service)) = service_ref(&event) else {
                return;
            };
            registered_store.update(|current| register_service(current, &domain, &service));

            // The placeholder is replaced once registrations settle.
            let Some(conn) = weak.upgrade() else {
                return;
            };
            match services_collection(&conn) {
                Ok(collection) => collection.refresh_debounced(),
                Err(e) => debug!(error = %e, "Services collection unavailable"),
            }
        })
        .await?;

    let removed = match conn
        .subscribe_events(Some("service_removed"), move |event| {
            let Some((domain, service)) = service_ref(&event) else {
                return;
            };
            store.update(|current| remove_service(current, &domain, &service));
        })
        .await
    {
        Ok(subscription) => subscription,
        Err(e) => {
            registered.cancel();
            return Err(e);
        }
    };

    Ok(vec![registered, removed])
}

// ============================================================================
// Tests
// ============================================================================
