//! Envelope codec (C1): every frame on the signaling socket is one JSON
//! object `{type, payload, timestamp}`. `type` selects the payload's shape;
//! decoding fails closed if the tag is unknown or the payload doesn't match
//! it, which the dispatcher treats as a malformed frame (log + drop, socket
//! stays open).
//!
//! Client-originated and hub-originated messages are modelled as two
//! separate tagged enums (`ClientMessage`, `ServerMessage`) rather than one,
//! because a handful of tags (`VIEWER_READY`) carry a different payload
//! shape depending on direction: the client sends `{room_id, user_id}`, the
//! hub replays `{viewer}` to the broadcaster. Grounded in `rt-protocol`'s
//! `#[serde(tag = "kind")]` `WsMessage` enum, adapted to this spec's
//! adjacently-tagged `{type, payload}` shape via `tag = "type", content =
//! "payload"`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hub::JoinError;
use crate::identity::User;
use crate::room::{ChatEntry, ChatKind, RoomSnapshot};

// ---------------------------------------------------------------------------
// Inbound (client -> hub)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRoomPayload {
    pub room_id: String,
    pub username: String,
    /// Raw wire value; validated against `Role::parse` by the dispatcher so
    /// an unrecognized role produces `INVALID_ROLE` rather than a dropped
    /// frame.
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamReadyPayload {
    pub room_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerReadyPayload {
    pub room_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageBody {
    pub room_id: String,
    pub content: String,
    pub kind: ChatKind,
    #[serde(default)]
    pub recipient_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub message: ChatMessageBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub room_id: String,
    pub sender: String,
    pub receiver: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    JoinRoom(JoinRoomPayload),
    StreamReady(StreamReadyPayload),
    ViewerReady(ViewerReadyPayload),
    ChatMessage(ChatMessagePayload),
    Offer(SignalPayload),
    Answer(SignalPayload),
    IceCandidate(SignalPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(flatten)]
    pub message: ClientMessage,
    /// Minted by the sender; informational only, never trusted for ordering
    /// or authorization (§4 of SPEC_FULL.md).
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl InboundEnvelope {
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }
}

// ---------------------------------------------------------------------------
// Outbound (hub -> client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomJoinedPayload {
    pub room: RoomSnapshot,
    pub user: User,
    pub messages: Vec<ChatEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomStatePayload {
    pub room: RoomSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserJoinedPayload {
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLeftPayload {
    pub user: User,
    pub room: RoomSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcasterReadyPayload {
    pub broadcaster: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerReadyEventPayload {
    pub viewer: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageReceivedPayload {
    pub message: ChatEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl From<&JoinError> for ErrorPayload {
    fn from(err: &JoinError) -> Self {
        ErrorPayload {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    RoomJoined(RoomJoinedPayload),
    RoomState(RoomStatePayload),
    UserJoined(UserJoinedPayload),
    UserLeft(UserLeftPayload),
    BroadcasterReady(BroadcasterReadyPayload),
    ViewerReady(ViewerReadyEventPayload),
    ChatMessageReceived(ChatMessageReceivedPayload),
    Offer(SignalPayload),
    Answer(SignalPayload),
    IceCandidate(SignalPayload),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    #[serde(flatten)]
    pub message: ServerMessage,
    pub timestamp: DateTime<Utc>,
}

impl OutboundEnvelope {
    pub fn new(message: ServerMessage) -> Self {
        OutboundEnvelope {
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_join_room() {
        let text = r#"{"type":"JOIN_ROOM","payload":{"room_id":"r1","username":"alice","role":"broadcaster"},"timestamp":"2026-07-28T00:00:00Z"}"#;
        let env = InboundEnvelope::decode(text).unwrap();
        match env.message {
            ClientMessage::JoinRoom(p) => {
                assert_eq!(p.room_id, "r1");
                assert_eq!(p.username, "alice");
                assert_eq!(p.role, "broadcaster");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn decodes_chat_message() {
        let text = r#"{"type":"CHAT_MESSAGE","payload":{"message":{"room_id":"r1","content":"hi","kind":"public"}},"timestamp":null}"#;
        let env = InboundEnvelope::decode(text).unwrap();
        match env.message {
            ClientMessage::ChatMessage(p) => {
                assert_eq!(p.message.content, "hi");
                assert_eq!(p.message.kind, ChatKind::Public);
                assert!(p.message.recipient_id.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_fails_decode() {
        let text = r#"{"type":"NOT_A_THING","payload":{},"timestamp":null}"#;
        assert!(InboundEnvelope::decode(text).is_err());
    }

    #[test]
    fn missing_payload_field_fails_decode() {
        let text = r#"{"type":"JOIN_ROOM","payload":{"room_id":"r1"},"timestamp":null}"#;
        assert!(InboundEnvelope::decode(text).is_err());
    }

    #[test]
    fn outbound_round_trips_ignoring_timestamp() {
        let msg = ServerMessage::Error(ErrorPayload {
            code: "ROOM_NOT_FOUND".to_string(),
            message: "no such room".to_string(),
        });
        let env = OutboundEnvelope::new(msg.clone());
        let text = env.encode().unwrap();
        let decoded: OutboundEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.message, msg);
    }

    #[test]
    fn tag_is_screaming_snake_case() {
        let env = OutboundEnvelope::new(ServerMessage::BroadcasterReady(BroadcasterReadyPayload {
            broadcaster: User {
                id: "u1".into(),
                username: "bob".into(),
                role: crate::identity::Role::Broadcaster,
                room_id: "r1".into(),
            },
        }));
        let text = env.encode().unwrap();
        assert!(text.contains(r#""type":"BROADCASTER_READY""#));
    }
}
