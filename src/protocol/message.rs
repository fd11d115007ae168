//! Inbound correlated messages.
//!
//! After authentication every inbound payload is either a single JSON object
//! or an array of them (coalesced batch). Each object carries the `id` of the
//! command it answers and a `type` discriminator.
//!
//! | `type` | Meaning |
//! |--------|---------|
//! | `result` | Terminal success (`success: true`, `result`) or failure (`error`) |
//! | `event` | Push event for a subscription |
//! | `pong` | Keepalive reply |

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::identifiers::CommandId;

// ============================================================================
// IncomingMessage
// ============================================================================

/// A single inbound message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    /// Terminal reply to a command.
    Result {
        /// Correlation id.
        id: CommandId,
        /// Whether the command succeeded.
        success: bool,
        /// Result payload (success only).
        #[serde(default)]
        result: Option<Value>,
        /// Error payload (failure only).
        #[serde(default)]
        error: Option<RemoteError>,
    },

    /// Push event for a subscription.
    Event {
        /// Correlation id of the subscription.
        id: CommandId,
        /// Event payload.
        event: Value,
    },

    /// Keepalive reply.
    Pong {
        /// Correlation id of the ping.
        id: CommandId,
    },

    /// Anything else. Ignored for forward compatibility.
    #[serde(other)]
    Unknown,
}

// ============================================================================
// RemoteError
// ============================================================================

/// Error body of a failed `result`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteError {
    /// Server error code. Usually a string, occasionally numeric.
    #[serde(default)]
    pub code: Value,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

impl RemoteError {
    /// Returns the code rendered as a string.
    #[must_use]
    pub fn code_string(&self) -> String {
        match &self.code {
            Value::String(code) => code.clone(),
            Value::Null => "unknown_error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        Self::remote(err.code_string(), err.message)
    }
}

// ============================================================================
// Batch Parsing
// ============================================================================

/// Parses an inbound payload into its messages, in array order.
///
/// Individual entries that do not decode are logged and skipped; a payload
/// that is not JSON at all is an error.
///
/// # Errors
///
/// Returns [`Error::Json`] if the payload is not valid JSON.
pub fn parse_batch(text: &str) -> Result<Vec<IncomingMessage>> {
    let value: Value = serde_json::from_str(text)?;
    let entries = match value {
        Value::Array(entries) => entries,
        single => vec![single],
    };

    let messages = entries
        .into_iter()
        .filter_map(|entry| match IncomingMessage::deserialize(&entry) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, %entry, "Skipping malformed message");
                None
            }
        })
        .collect();

    Ok(messages)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_parse_single_result() {
        let messages =
            parse_batch(r#"{"id": 3, "type": "result", "success": true, "result": {"a": 1}}"#)
                .expect("parse");
        assert_eq!(
            messages,
            vec![IncomingMessage::Result {
                id: CommandId::new(3),
                success: true,
                result: Some(json!({"a": 1})),
                error: None,
            }]
        );
    }

    #[test]
    fn test_parse_batch_preserves_order() {
        let text = r#"[
            {"id": 4, "type": "event", "event": {"n": 1}},
            {"id": 4, "type": "event", "event": {"n": 2}},
            {"id": 5, "type": "pong"}
        ]"#;
        let messages = parse_batch(text).expect("parse");
        assert_eq!(messages.len(), 3);
        assert!(matches!(&messages[0], IncomingMessage::Event { event, .. } if event["n"] == 1));
        assert!(matches!(&messages[1], IncomingMessage::Event { event, .. } if event["n"] == 2));
        assert!(matches!(messages[2], IncomingMessage::Pong { id } if id == CommandId::new(5)));
    }

    #[test]
    fn test_unknown_type_is_tolerated() {
        let messages = parse_batch(r#"{"type": "brand_new_thing", "id": 1}"#).expect("parse");
        assert_eq!(messages, vec![IncomingMessage::Unknown]);
    }

    #[test]
    fn test_malformed_entry_is_skipped() {
        let messages =
            parse_batch(r#"[{"type": "event"}, {"id": 2, "type": "pong"}]"#).expect("parse");
        assert_eq!(messages, vec![IncomingMessage::Pong { id: CommandId::new(2) }]);
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(parse_batch("not json").is_err());
    }

    #[test]
    fn test_remote_error_conversion() {
        let remote = RemoteError {
            code: json!("not_found"),
            message: "Unknown entity".into(),
        };
        let err: Error = remote.into();
        assert!(matches!(err, Error::Remote { ref code, .. } if code == "not_found"));

        let numeric = RemoteError {
            code: json!(3),
            message: "Connection lost".into(),
        };
        assert_eq!(numeric.code_string(), "3");
    }
}
