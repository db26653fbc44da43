//! Realtime wire protocol.
//!
//! Every frame on the `/cable` socket is a JSON object of the shape
//! `{"type": "...", "payload": ..., "room": "..."}`. Outbound events carry
//! `room` when they were broadcast to a room; control frames sent by clients
//! never do.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FrameError;

/// Reserved room for account-wide badge and alert events.
pub const NOTIFICATIONS_ROOM: &str = "notifications";

/// Event tags emitted by the REST and webhook handlers.
pub mod event_types {
    pub const MESSAGE_CREATED: &str = "message.created";
    pub const CONVERSATION_CREATED: &str = "conversation.created";
    pub const CONVERSATION_UPDATED: &str = "conversation.updated";
}

/// Room identifier for a single conversation.
pub fn conversation_room(conversation_id: Uuid) -> String {
    conversation_id.to_string()
}

/// Outbound event frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

impl EventFrame {
    /// Frame addressed to every connection subscribed to `room`.
    pub fn to_room(
        room: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            room: Some(room.into()),
        }
    }

    /// Frame addressed to a user; carries no room.
    pub fn to_user(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            room: None,
        }
    }

    /// Serialize once so the same buffer can be shared by every recipient.
    pub fn encode(&self) -> Result<Arc<str>, FrameError> {
        let json = serde_json::to_string(self).map_err(FrameError::Encode)?;
        Ok(Arc::from(json))
    }
}

/// Raw inbound frame before its `type` is interpreted.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Control message sent by a client to manage its room set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    Subscribe(String),
    Unsubscribe(String),
    /// Any other `type`. Tolerated so older servers keep working with newer clients.
    Unknown(String),
}

impl ControlFrame {
    /// Parse a text frame received from a client.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let frame: InboundFrame = serde_json::from_str(text).map_err(FrameError::Malformed)?;

        match frame.kind.as_str() {
            "subscribe" => Ok(Self::Subscribe(room_from_payload(&frame.kind, frame.payload)?)),
            "unsubscribe" => Ok(Self::Unsubscribe(room_from_payload(&frame.kind, frame.payload)?)),
            _ => Ok(Self::Unknown(frame.kind)),
        }
    }
}

fn room_from_payload(kind: &str, payload: serde_json::Value) -> Result<String, FrameError> {
    match payload {
        serde_json::Value::String(room) if !room.trim().is_empty() => Ok(room),
        other => Err(FrameError::InvalidRoom {
            kind: kind.to_string(),
            payload: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn room_frame_serializes_room_field() {
        let frame = EventFrame::to_room("conv-42", event_types::MESSAGE_CREATED, json!({"text": "hi"}));
        let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({"type": "message.created", "payload": {"text": "hi"}, "room": "conv-42"})
        );
    }

    #[test]
    fn user_frame_omits_room() {
        let frame = EventFrame::to_user("ping", serde_json::Value::Null);
        let value: serde_json::Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

        assert_eq!(value, json!({"type": "ping", "payload": null}));
        assert!(value.get("room").is_none());
    }

    #[test]
    fn decodes_subscribe_and_unsubscribe() {
        assert_eq!(
            ControlFrame::decode(r#"{"type":"subscribe","payload":"notifications"}"#).unwrap(),
            ControlFrame::Subscribe(NOTIFICATIONS_ROOM.to_string())
        );
        assert_eq!(
            ControlFrame::decode(r#"{"type":"unsubscribe","payload":"conv-42"}"#).unwrap(),
            ControlFrame::Unsubscribe("conv-42".to_string())
        );
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        assert_eq!(
            ControlFrame::decode(r#"{"type":"typing","payload":{"on":true}}"#).unwrap(),
            ControlFrame::Unknown("typing".to_string())
        );
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            ControlFrame::decode("not json"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            ControlFrame::decode(r#"{"payload":"conv-42"}"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn subscribe_requires_string_room() {
        assert!(matches!(
            ControlFrame::decode(r#"{"type":"subscribe","payload":42}"#),
            Err(FrameError::InvalidRoom { .. })
        ));
        assert!(matches!(
            ControlFrame::decode(r#"{"type":"subscribe"}"#),
            Err(FrameError::InvalidRoom { .. })
        ));
        assert!(matches!(
            ControlFrame::decode(r#"{"type":"unsubscribe","payload":"  "}"#),
            Err(FrameError::InvalidRoom { .. })
        ));
    }

    #[test]
    fn conversation_room_is_uuid_string() {
        let id = Uuid::new_v4();
        assert_eq!(conversation_room(id), id.to_string());
    }
}
