//! Public event surface

use bytes::Bytes;
use serde_json::Value;

/// Events broadcast to every [`super::GearClient::events`] receiver
#[derive(Debug, Clone, PartialEq)]
pub enum GearEvent {
    /// Broker session opened (also after every automatic reconnect)
    Connected,
    /// Session ended gracefully
    Closed,
    /// Connection dropped, or `disconnect()` was called
    Disconnected,
    /// Emitted right before [`GearEvent::Closed`] when the session ends
    PieClosed,
    /// Application message; `topic` is in public (non-namespaced) form
    Message { topic: String, payload: Bytes },
    /// Another gear announced itself
    Present(Value),
    /// Another gear left
    Absent(Value),
    Error(String),
    Warning(String),
    Info(String),
    /// The gateway rejected a pending request token
    Rejected(String),
}

impl GearEvent {
    /// Event name as used on the wire protocol's event surface
    pub fn name(&self) -> &'static str {
        match self {
            GearEvent::Connected => "connected",
            GearEvent::Closed => "closed",
            GearEvent::Disconnected => "disconnected",
            GearEvent::PieClosed => "pieclosed",
            GearEvent::Message { .. } => "message",
            GearEvent::Present(_) => "present",
            GearEvent::Absent(_) => "absent",
            GearEvent::Error(_) => "error",
            GearEvent::Warning(_) => "warning",
            GearEvent::Info(_) => "info",
            GearEvent::Rejected(_) => "rejected",
        }
    }

    /// Message payload as UTF-8 text, if this is a message event
    pub fn message_text(&self) -> Option<String> {
        match self {
            GearEvent::Message { payload, .. } => {
                Some(String::from_utf8_lossy(payload).into_owned())
            }
            _ => None,
        }
    }
}
