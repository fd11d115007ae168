//! Built-in collections.
//!
//! | Key | Module | Value | Upstream |
//! |-----|--------|-------|----------|
//! | `_ent` | `entities` | [`HassEntities`](crate::entities::HassEntities) | `subscribe_entities` or `get_states` + `state_changed` |
//! | `_cnf` | `config` | [`HassConfig`] | `get_config`, `component_loaded`, `core_config_updated` |
//! | `_srv` | `services` | [`HassServices`] | `get_services`, `service_registered`, `service_removed` |

// ============================================================================
// Submodules
// ============================================================================

/// Core configuration.
pub mod config;

/// Entity states.
pub mod entities;

/// Service catalogue.
pub mod services;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{CONFIG_KEY, HassConfig, config_collection, subscribe_config};
pub use entities::{ENTITIES_KEY, entities_collection, subscribe_entities};
pub use services::{
    HassDomainServices, HassService, HassServices, SERVICES_KEY, register_service,
    remove_service, services_collection, subscribe_services,
};
