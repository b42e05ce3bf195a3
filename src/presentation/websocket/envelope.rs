//! WebSocket Envelope
//!
//! The tagged `{"type", "payload"}` unit exchanged over the wire and accepted
//! by the broadcast API.

use axum::extract::ws::Utf8Bytes;
use serde::{de, Deserialize, Serialize};
use serde_json::json;

use crate::domain::{RoomId, UserId};

/// Client liveness probe
pub const PING: &str = "ping";
/// Reply to [`PING`]
pub const PONG: &str = "pong";
/// A message was posted in a room
pub const NEW_MESSAGE: &str = "new_message";
/// A member advanced their read marker in a room
pub const MESSAGES_READ: &str = "messages_read";

/// Serialized envelope text.
///
/// Reference counted: cloning a frame for every recipient of a broadcast
/// shares one buffer.
pub type Frame = Utf8Bytes;

/// Wire envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Envelope {
    /// Envelope with a payload
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload: Some(payload),
        }
    }

    /// Envelope carrying only a type tag
    pub fn tag(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: None,
        }
    }

    pub fn pong() -> Self {
        Self::tag(PONG)
    }

    /// `new_message` event; the payload is the message as the store returned it.
    pub fn new_message(message: serde_json::Value) -> Self {
        Self::new(NEW_MESSAGE, message)
    }

    /// `messages_read` event
    pub fn messages_read(room_id: RoomId, user_id: UserId, last_read_message_id: i64) -> Self {
        Self::new(
            MESSAGES_READ,
            json!({
                "room_id": room_id,
                "user_id": user_id,
                "last_read_message_id": last_read_message_id,
            }),
        )
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Serialize once into a shareable frame.
    pub fn encode(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }

    /// Parse an inbound text frame. Only a JSON object is an envelope.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(de::Error::custom("envelope must be a JSON object"));
        }
        serde_json::from_value(value)
    }
}
