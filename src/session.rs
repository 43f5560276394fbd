//! Session (C2): one live bidirectional framed channel to a single client.
//!
//! A `Session` is owned by the I/O task that reads it; the hub's registries
//! hold only an `Arc<Session>` back-reference, usable under the hub lock to
//! queue a write (§3 Ownership). Writes are serialized through an internal
//! mutex so that concurrent senders — the dispatcher replying to its own
//! client, and other dispatchers relaying/fanning-out to this one — never
//! interleave two envelopes on the wire (§4.2, §5 "per-session write
//! serialization").
//!
//! The transport is behind a small trait rather than a concrete
//! `SplitSink<WebSocket, _>` so unit tests (see `hub.rs`) can construct a
//! `Session` backed by a channel instead of a real socket.

use std::sync::OnceLock;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

use crate::protocol::OutboundEnvelope;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport closed")]
    Closed,
}

#[axum::async_trait]
trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError>;
}

#[axum::async_trait]
impl Transport for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        self.send(Message::Text(text.into()))
            .await
            .map_err(|_| SessionError::Closed)
    }
}

struct ChannelTransport(mpsc::UnboundedSender<String>);

#[axum::async_trait]
impl Transport for ChannelTransport {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        self.0.send(text).map_err(|_| SessionError::Closed)
    }
}

pub struct Session {
    /// Connection-level id, used only for log correlation — distinct from
    /// the user id minted on `JOIN_ROOM` (§3 Session vs. User lifecycle).
    pub id: String,
    /// Set exactly once, by the dispatcher on a successful `JOIN_ROOM`
    /// (§3: "Mutated by no one after creation").
    user_id: OnceLock<String>,
    writer: AsyncMutex<Box<dyn Transport>>,
}

impl Session {
    pub fn new(id: String, sink: SplitSink<WebSocket, Message>) -> Self {
        Session {
            id,
            user_id: OnceLock::new(),
            writer: AsyncMutex::new(Box::new(sink)),
        }
    }

    /// Construct a session backed by an in-memory channel, for hub unit
    /// tests that never touch a real socket.
    #[cfg(test)]
    pub fn for_test() -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: OnceLock::new(),
            writer: AsyncMutex::new(Box::new(ChannelTransport(tx))),
        };
        (std::sync::Arc::new(session), rx)
    }

    /// Bind the identity minted for this session. Only the dispatcher calls
    /// this, exactly once, right after a successful `Hub::join`.
    pub fn bind_identity(&self, user_id: String) {
        let _ = self.user_id.set(user_id);
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.get().map(String::as_str)
    }

    /// Encode and write one envelope. Safe under concurrent callers — only
    /// one envelope is ever on the wire at a time (§4.2).
    pub async fn send(&self, envelope: &OutboundEnvelope) -> Result<(), SessionError> {
        let text = envelope.encode()?;
        let mut writer = self.writer.lock().await;
        writer.send_text(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorPayload, ServerMessage};

    #[tokio::test]
    async fn bind_identity_is_set_once() {
        let (session, _rx) = Session::for_test();
        assert!(session.user_id().is_none());
        session.bind_identity("u1".to_string());
        assert_eq!(session.user_id(), Some("u1"));
        // Re-binding is a no-op — identity is immutable once created (§3).
        session.bind_identity("u2".to_string());
        assert_eq!(session.user_id(), Some("u1"));
    }

    #[tokio::test]
    async fn send_serializes_to_one_frame() {
        let (session, mut rx) = Session::for_test();
        let envelope = OutboundEnvelope::new(ServerMessage::Error(ErrorPayload {
            code: "ROOM_NOT_FOUND".to_string(),
            message: "no such room".to_string(),
        }));
        session.send(&envelope).await.unwrap();
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("ROOM_NOT_FOUND"));
    }
}
