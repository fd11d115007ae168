//! Authentication phase envelopes.
//!
//! | Direction | `type` | Purpose |
//! |-----------|--------|---------|
//! | Server → Client | `auth_required` | Channel open, waiting for credential |
//! | Client → Server | `auth` | Carries the access token |
//! | Server → Client | `auth_ok` | Accepted, carries `ha_version` |
//! | Server → Client | `auth_invalid` | Rejected, terminal |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

// ============================================================================
// Message Types
// ============================================================================

/// Server signals the channel is ready for authentication.
pub const MSG_TYPE_AUTH_REQUIRED: &str = "auth_required";

/// Server rejected the credential.
pub const MSG_TYPE_AUTH_INVALID: &str = "auth_invalid";

/// Server accepted the credential.
pub const MSG_TYPE_AUTH_OK: &str = "auth_ok";

// ============================================================================
// AuthMessage
// ============================================================================

/// Outbound `auth` frame.
#[derive(Debug, Clone, Serialize)]
pub struct AuthMessage<'a> {
    #[serde(rename = "type")]
    message_type: &'static str,
    access_token: &'a str,
}

impl<'a> AuthMessage<'a> {
    /// Creates the auth frame for `access_token`.
    #[inline]
    #[must_use]
    pub fn new(access_token: &'a str) -> Self {
        Self {
            message_type: "auth",
            access_token,
        }
    }
}

// ============================================================================
// HandshakeMessage
// ============================================================================

/// Inbound message during the authentication phase.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeMessage {
    /// Ready for the credential.
    AuthRequired {
        /// Server version, when advertised.
        #[serde(default)]
        ha_version: Option<String>,
    },

    /// Credential accepted.
    AuthOk {
        /// Server version string, e.g. `2024.1.0`.
        #[serde(default)]
        ha_version: String,
    },

    /// Credential rejected.
    AuthInvalid {
        /// Rejection reason.
        #[serde(default)]
        message: Option<String>,
    },

    /// Anything else. Ignored.
    #[serde(other)]
    Other,
}

impl HandshakeMessage {
    /// Parses a frame, mapping undecodable frames to [`HandshakeMessage::Other`].
    #[must_use]
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or(Self::Other)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_message_format() {
        let json = serde_json::to_string(&AuthMessage::new("abc")).expect("serialize");
        assert_eq!(json, r#"{"type":"auth","access_token":"abc"}"#);
    }

    #[test]
    fn test_parse_handshake_messages() {
        assert_eq!(
            HandshakeMessage::parse(r#"{"type":"auth_required","ha_version":"2024.1.0"}"#),
            HandshakeMessage::AuthRequired {
                ha_version: Some("2024.1.0".into())
            }
        );
        assert_eq!(
            HandshakeMessage::parse(r#"{"type":"auth_ok","ha_version":"2022.9.1"}"#),
            HandshakeMessage::AuthOk {
                ha_version: "2022.9.1".into()
            }
        );
        assert_eq!(
            HandshakeMessage::parse(r#"{"type":"auth_invalid","message":"bad"}"#),
            HandshakeMessage::AuthInvalid {
                message: Some("bad".into())
            }
        );
    }

    #[test]
    fn test_unknown_and_garbage_frames() {
        assert_eq!(
            HandshakeMessage::parse(r#"{"type":"something_new"}"#),
            HandshakeMessage::Other
        );
        assert_eq!(HandshakeMessage::parse("garbage"), HandshakeMessage::Other);
    }
}
