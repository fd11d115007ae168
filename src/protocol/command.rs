//! Outbound command envelopes.
//!
//! Every correlated outbound frame is a JSON object with a `type`
//! discriminator and an integer `id` assigned by the connection when the
//! frame is actually sent. Builders here produce id-less [`Command`]s.
//!
//! # Format
//!
//! ```json
//! { "id": 5, "type": "call_service", "domain": "light", "service": "turn_on" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::identifiers::CommandId;

// ============================================================================
// Command
// ============================================================================

/// An outbound command without its correlation id.
///
/// Treated as an opaque remote-procedure call by the connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    fields: Map<String, Value>,
}

impl Command {
    /// Creates a command of the given `type`.
    #[must_use]
    pub fn new(command_type: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("type".to_string(), Value::String(command_type.into()));
        Self { fields }
    }

    /// Adds a field to the command.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Returns the command `type`.
    #[must_use]
    pub fn command_type(&self) -> &str {
        self.fields
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Serializes the command with the given correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_frame(&self, id: CommandId) -> Result<String> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::from(id.as_u64()));
        Ok(serde_json::to_string(&fields)?)
    }
}

impl TryFrom<Value> for Command {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) if fields.get("type").is_some_and(Value::is_string) => {
                Ok(Self { fields })
            }
            other => Err(Error::protocol(format!(
                "Command must be an object with a string `type`, got {other}"
            ))),
        }
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Requests every entity state.
#[must_use]
pub fn get_states() -> Command {
    Command::new("get_states")
}

/// Requests the server configuration.
#[must_use]
pub fn get_config() -> Command {
    Command::new("get_config")
}

/// Requests the service catalogue.
#[must_use]
pub fn get_services() -> Command {
    Command::new("get_services")
}

/// Requests the authenticated user.
#[must_use]
pub fn current_user() -> Command {
    Command::new("auth/current_user")
}

/// Invokes a service.
///
/// `service_data` is only included when given.
#[must_use]
pub fn call_service(
    domain: &str,
    service: &str,
    service_data: Option<Value>,
    target: Option<Value>,
    return_response: bool,
) -> Command {
    let mut command = Command::new("call_service")
        .with("domain", domain)
        .with("service", service)
        .with("return_response", return_response);
    if let Some(target) = target {
        command = command.with("target", target);
    }
    if let Some(data) = service_data {
        command = command.with("service_data", data);
    }
    command
}

/// Subscribes to a specific event type, or to all events.
#[must_use]
pub fn subscribe_events(event_type: Option<&str>) -> Command {
    let command = Command::new("subscribe_events");
    match event_type {
        Some(event_type) => command.with("event_type", event_type),
        None => command,
    }
}

/// Cancels the subscription registered under `subscription`.
#[must_use]
pub fn unsubscribe_events(subscription: CommandId) -> Command {
    Command::new("unsubscribe_events").with("subscription", subscription.as_u64())
}

/// Subscribes to the compressed entity diff stream.
#[must_use]
pub fn subscribe_entities() -> Command {
    Command::new("subscribe_entities")
}

/// Keepalive.
#[must_use]
pub fn ping() -> Command {
    Command::new("ping")
}

/// Post-auth feature negotiation frame. Always sent with the reserved id.
#[must_use]
pub fn supported_features_frame() -> String {
    json!({
        "type": "supported_features",
        "id": CommandId::SUPPORTED_FEATURES.as_u64(),
        "features": { "coalesce_messages": 1 },
    })
    .to_string()
}

// ============================================================================
// Tests
// ============================================================================
