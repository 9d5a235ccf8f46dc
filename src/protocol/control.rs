//! Control messages carried on reserved `/&` topics

use super::topics::CONTROL_PREFIX;
use serde_json::Value;

/// A decoded control message
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Another gear came online; payload is JSON when it parses, else raw text
    Present(Value),
    /// Another gear went offline
    Absent(Value),
    /// The broker asks us to look the endpoint up again
    ResetEndpoint,
    /// Any other verb, ignored
    Unknown(String),
}

impl ControlMessage {
    /// Decode a control topic (already stripped of the application namespace).
    /// Returns `None` for non-control topics.
    ///
    /// Per-client control topics (`/&id/{client}/{verb}`) carry their verb
    /// after the client id.
    pub fn parse(topic: &str, payload: &[u8]) -> Option<Self> {
        let rest = topic.strip_prefix(CONTROL_PREFIX)?;
        let verb = match rest.strip_prefix("id/") {
            Some(scoped) => scoped.split('/').nth(1).unwrap_or_default(),
            None => rest.split('/').next().unwrap_or_default(),
        };

        Some(match verb {
            "present" => ControlMessage::Present(decode_payload(payload)),
            "absent" => ControlMessage::Absent(decode_payload(payload)),
            "resetendpoint" => ControlMessage::ResetEndpoint,
            other => ControlMessage::Unknown(other.to_string()),
        })
    }
}

/// JSON-decode a payload, falling back to its text
pub fn decode_payload(payload: &[u8]) -> Value {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
}
