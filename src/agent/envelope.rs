//! Wire envelope exchanged with the device agent.
//!
//! Every frame in either direction is `{type, id, payload?, error?}`. The agent
//! sometimes ships `payload` as a JSON string holding the real structure, so
//! payload access always goes through [`decode_payload`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const LIST_READERS: &str = "list_readers";
pub const SUBSCRIBE: &str = "subscribe";
pub const UNSUBSCRIBE: &str = "unsubscribe";
pub const CARD_DETECTED: &str = "card_detected";
pub const CARD_REMOVED: &str = "card_removed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn request(kind: impl Into<String>, id: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            payload,
            error: None,
        }
    }

    /// Unsolicited event (no request id)
    pub fn event(kind: impl Into<String>, payload: Option<Value>) -> Self {
        Self::request(kind, "", payload)
    }

    /// Error text reported by the agent, if any. An empty string counts as no error.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|msg| !msg.is_empty())
    }

    /// Payload normalised to a structured value.
    pub fn decoded_payload(&self) -> Result<Value, serde_json::Error> {
        decode_payload(self.payload.as_ref())
    }
}

/// Normalise a payload that may be a native value or a string holding JSON.
///
/// A missing payload decodes to `Value::Null`.
pub fn decode_payload(payload: Option<&Value>) -> Result<Value, serde_json::Error> {
    match payload {
        None => Ok(Value::Null),
        Some(Value::String(raw)) => serde_json::from_str(raw),
        Some(value) => Ok(value.clone()),
    }
}
