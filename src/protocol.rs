//! JSON wire protocol for the collaboration session.
//!
//! Every frame on the wire is one JSON object:
//! ```text
//! { "type": "collaboration" | "presence",
//!   "userId": "...", "sessionId": "...",
//!   "data": <payload discriminated by an inner "type"> }
//! ```
//!
//! `collaboration` payloads carry cursor, selection, and raw edit events;
//! `presence` payloads carry join/leave/update. Edits are relayed verbatim —
//! there is no merge algorithm at this layer.

use serde::{Deserialize, Serialize};

/// Local participant identity announced on join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub user_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl ParticipantInfo {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            avatar: None,
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// Pointer position in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

/// Text range with the selected content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub start: u64,
    pub end: u64,
    pub text: String,
}

/// Raw edit operation. Relayed without reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOp {
    pub position: u64,
    pub text: String,
    pub action: EditAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditAction {
    Insert,
    Delete,
}

/// Self-reported availability. An intent, not a liveness guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
}

/// `collaboration` payload variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CollaborationEvent {
    #[serde(rename_all = "camelCase")]
    Cursor {
        user_id: String,
        data: CursorPosition,
    },
    #[serde(rename_all = "camelCase")]
    Selection {
        user_id: String,
        data: SelectionRange,
    },
    #[serde(rename_all = "camelCase")]
    Edit { user_id: String, data: EditOp },
}

impl CollaborationEvent {
    pub fn user_id(&self) -> &str {
        match self {
            Self::Cursor { user_id, .. }
            | Self::Selection { user_id, .. }
            | Self::Edit { user_id, .. } => user_id,
        }
    }
}

/// `presence` payload variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PresenceEvent {
    #[serde(rename_all = "camelCase")]
    Join {
        user_id: String,
        user_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        avatar: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Leave {
        user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Update {
        user_id: String,
        status: PresenceStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        activity: Option<String>,
    },
}

impl PresenceEvent {
    pub fn user_id(&self) -> &str {
        match self {
            Self::Join { user_id, .. }
            | Self::Leave { user_id, .. }
            | Self::Update { user_id, .. } => user_id,
        }
    }
}

/// Top-level message envelope.
///
/// The outer `userId` identifies the sender; `sessionId` is the routing key
/// the relay uses to pick the peer room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireMessage {
    #[serde(rename_all = "camelCase")]
    Collaboration {
        user_id: String,
        session_id: String,
        data: CollaborationEvent,
    },
    #[serde(rename_all = "camelCase")]
    Presence {
        user_id: String,
        session_id: String,
        data: PresenceEvent,
    },
}

impl WireMessage {
    /// Cursor position update.
    pub fn cursor(user_id: &str, session_id: &str, x: f64, y: f64) -> Self {
        Self::Collaboration {
            user_id: user_id.to_owned(),
            session_id: session_id.to_owned(),
            data: CollaborationEvent::Cursor {
                user_id: user_id.to_owned(),
                data: CursorPosition { x, y },
            },
        }
    }

    /// Selection range update.
    pub fn selection(user_id: &str, session_id: &str, start: u64, end: u64, text: &str) -> Self {
        Self::Collaboration {
            user_id: user_id.to_owned(),
            session_id: session_id.to_owned(),
            data: CollaborationEvent::Selection {
                user_id: user_id.to_owned(),
                data: SelectionRange {
                    start,
                    end,
                    text: text.to_owned(),
                },
            },
        }
    }

    /// Raw edit relay.
    pub fn edit(
        user_id: &str,
        session_id: &str,
        position: u64,
        text: &str,
        action: EditAction,
    ) -> Self {
        Self::Collaboration {
            user_id: user_id.to_owned(),
            session_id: session_id.to_owned(),
            data: CollaborationEvent::Edit {
                user_id: user_id.to_owned(),
                data: EditOp {
                    position,
                    text: text.to_owned(),
                    action,
                },
            },
        }
    }

    /// Join announcement for the local participant.
    pub fn join(info: &ParticipantInfo, session_id: &str) -> Self {
        Self::Presence {
            user_id: info.user_id.clone(),
            session_id: session_id.to_owned(),
            data: PresenceEvent::Join {
                user_id: info.user_id.clone(),
                user_name: info.name.clone(),
                avatar: info.avatar.clone(),
            },
        }
    }

    /// Leave announcement.
    pub fn leave(user_id: &str, user_name: Option<&str>, session_id: &str) -> Self {
        Self::Presence {
            user_id: user_id.to_owned(),
            session_id: session_id.to_owned(),
            data: PresenceEvent::Leave {
                user_id: user_id.to_owned(),
                user_name: user_name.map(str::to_owned),
            },
        }
    }

    /// Presence status change.
    pub fn presence_update(
        user_id: &str,
        session_id: &str,
        status: PresenceStatus,
        activity: Option<&str>,
    ) -> Self {
        Self::Presence {
            user_id: user_id.to_owned(),
            session_id: session_id.to_owned(),
            data: PresenceEvent::Update {
                user_id: user_id.to_owned(),
                status,
                activity: activity.map(str::to_owned),
            },
        }
    }

    /// Sender identity from the envelope.
    pub fn user_id(&self) -> &str {
        match self {
            Self::Collaboration { user_id, .. } | Self::Presence { user_id, .. } => user_id,
        }
    }

    /// Routing key from the envelope.
    pub fn session_id(&self) -> &str {
        match self {
            Self::Collaboration { session_id, .. } | Self::Presence { session_id, .. } => {
                session_id
            }
        }
    }

    /// Serialize to the JSON wire format.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from the JSON wire format.
    ///
    /// Frames with an unknown `type` discriminant fail here; receivers drop
    /// them for forward compatibility.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

/// Protocol and transport errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    Serialization(String),
    Deserialization(String),
    ConnectionClosed,
    Unreachable(String),
    Unauthorized,
    ProtocolMismatch(String),
    InvalidSession(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization error: {e}"),
            Self::Deserialization(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Unreachable(e) => write!(f, "Server unreachable: {e}"),
            Self::Unauthorized => write!(f, "Connection rejected: unauthorized"),
            Self::ProtocolMismatch(e) => write!(f, "Protocol mismatch: {e}"),
            Self::InvalidSession(e) => write!(f, "Invalid session parameters: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cursor_roundtrip() {
        let msg = WireMessage::cursor("u2", "s1", 10.0, 20.0);
        let encoded = msg.encode().unwrap();
        let decoded = WireMessage::decode(&encoded).unwrap();

        assert_eq!(decoded, msg);
        assert_eq!(decoded.user_id(), "u2");
        assert_eq!(decoded.session_id(), "s1");
    }

    #[test]
    fn test_cursor_wire_shape() {
        let msg = WireMessage::cursor("u2", "s1", 10.0, 20.0);
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "collaboration",
                "userId": "u2",
                "sessionId": "s1",
                "data": {
                    "type": "cursor",
                    "userId": "u2",
                    "data": { "x": 10.0, "y": 20.0 }
                }
            })
        );
    }

    #[test]
    fn test_selection_roundtrip() {
        let msg = WireMessage::selection("u2", "s1", 4, 9, "hello");
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();

        match decoded {
            WireMessage::Collaboration {
                data: CollaborationEvent::Selection { data, .. },
                ..
            } => {
                assert_eq!(data.start, 4);
                assert_eq!(data.end, 9);
                assert_eq!(data.text, "hello");
            }
            other => panic!("Expected selection, got {other:?}"),
        }
    }

    #[test]
    fn test_edit_action_rendering() {
        let msg = WireMessage::edit("u2", "s1", 7, "x", EditAction::Insert);
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["data"]["data"]["action"], "insert");

        let msg = WireMessage::edit("u2", "s1", 7, "x", EditAction::Delete);
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["data"]["data"]["action"], "delete");
    }

    #[test]
    fn test_join_wire_shape() {
        let info = ParticipantInfo::new("u2", "Sarah").with_avatar("https://example.com/a.png");
        let msg = WireMessage::join(&info, "s1");
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "presence",
                "userId": "u2",
                "sessionId": "s1",
                "data": {
                    "type": "join",
                    "userId": "u2",
                    "userName": "Sarah",
                    "avatar": "https://example.com/a.png"
                }
            })
        );
    }

    #[test]
    fn test_join_omits_missing_avatar() {
        let msg = WireMessage::join(&ParticipantInfo::new("u2", "Sarah"), "s1");
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert!(value["data"].get("avatar").is_none());
    }

    #[test]
    fn test_leave_roundtrip() {
        let msg = WireMessage::leave("u2", Some("Sarah"), "s1");
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();

        match decoded {
            WireMessage::Presence {
                data: PresenceEvent::Leave { user_id, user_name },
                ..
            } => {
                assert_eq!(user_id, "u2");
                assert_eq!(user_name.as_deref(), Some("Sarah"));
            }
            other => panic!("Expected leave, got {other:?}"),
        }
    }

    #[test]
    fn test_leave_without_name_decodes() {
        // Leave frames may omit userName entirely.
        let raw = r#"{"type":"presence","userId":"u2","sessionId":"s1",
                      "data":{"type":"leave","userId":"u2"}}"#;
        let decoded = WireMessage::decode(raw).unwrap();
        match decoded {
            WireMessage::Presence {
                data: PresenceEvent::Leave { user_name, .. },
                ..
            } => assert!(user_name.is_none()),
            other => panic!("Expected leave, got {other:?}"),
        }
    }

    #[test]
    fn test_presence_update_status_rendering() {
        for (status, expected) in [
            (PresenceStatus::Online, "online"),
            (PresenceStatus::Away, "away"),
            (PresenceStatus::Busy, "busy"),
        ] {
            let msg = WireMessage::presence_update("u2", "s1", status, None);
            let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
            assert_eq!(value["data"]["status"], expected);
            assert!(value["data"].get("activity").is_none());
        }
    }

    #[test]
    fn test_presence_update_with_activity() {
        let msg = WireMessage::presence_update("u2", "s1", PresenceStatus::Busy, Some("editing"));
        let decoded = WireMessage::decode(&msg.encode().unwrap()).unwrap();
        match decoded {
            WireMessage::Presence {
                data: PresenceEvent::Update { status, activity, .. },
                ..
            } => {
                assert_eq!(status, PresenceStatus::Busy);
                assert_eq!(activity.as_deref(), Some("editing"));
            }
            other => panic!("Expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_payload_user_id_accessors() {
        let msg = WireMessage::cursor("u2", "s1", 1.0, 2.0);
        if let WireMessage::Collaboration { data, .. } = &msg {
            assert_eq!(data.user_id(), "u2");
        }
        let msg = WireMessage::leave("u3", None, "s1");
        if let WireMessage::Presence { data, .. } = &msg {
            assert_eq!(data.user_id(), "u3");
        }
    }

    #[test]
    fn test_decode_unknown_envelope_type_fails() {
        let raw = r#"{"type":"telemetry","userId":"u1","sessionId":"s1","data":{}}"#;
        assert!(WireMessage::decode(raw).is_err());
    }

    #[test]
    fn test_decode_unknown_payload_type_fails() {
        let raw = r#"{"type":"presence","userId":"u1","sessionId":"s1",
                      "data":{"type":"typing","userId":"u1"}}"#;
        assert!(WireMessage::decode(raw).is_err());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(WireMessage::decode("not json").is_err());
        assert!(WireMessage::decode("{}").is_err());
    }

    #[test]
    fn test_decode_unknown_status_fails() {
        let raw = r#"{"type":"presence","userId":"u1","sessionId":"s1",
                      "data":{"type":"update","userId":"u1","status":"invisible"}}"#;
        assert!(WireMessage::decode(raw).is_err());
    }
}
