//! Hub dispatcher (C8): the per-session inbound loop.
//!
//! One task per `Session`: accept the axum `WebSocketUpgrade`, split the
//! socket into its read/write halves (the write half becomes the `Session`,
//! the read half drives this loop), decode each frame (C1), and route it to
//! the hub (C3/C4/C6/C7). Grounded in `iwismer-rusty-timer`'s
//! `ws_forwarder_handler`/`handle_forwarder_socket` shape — upgrade handler
//! that hands the live socket to an async loop function — since the teacher
//! itself has no WebSocket route to draw from (it signals over REST + SSE).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::hub::{Hub, JoinError, RendezvousError};
use crate::identity::Role;
use crate::protocol::{
    BroadcasterReadyPayload, ChatMessageReceivedPayload, ClientMessage, ErrorPayload,
    InboundEnvelope, OutboundEnvelope, RoomJoinedPayload, RoomStatePayload, ServerMessage,
    SignalPayload, UserJoinedPayload, UserLeftPayload, ViewerReadyEventPayload,
};
use crate::session::Session;
use crate::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, state.hub))
}

async fn run_session(socket: WebSocket, hub: Arc<Hub>) {
    let (sink, mut stream) = socket.split();
    let session_id = Uuid::new_v4().to_string();
    let session = Arc::new(Session::new(session_id.clone(), sink));

    info!(session_id, "session connected");

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(session_id, error = %e, "transport error, closing session");
                break;
            }
        };

        let envelope = match InboundEnvelope::decode(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(session_id, error = %e, "dropping malformed frame");
                continue;
            }
        };

        dispatch(&hub, &session, envelope.message).await;
    }

    depart(&hub, &session).await;
    info!(session_id, "session disconnected");
}

async fn dispatch(hub: &Hub, session: &Arc<Session>, message: ClientMessage) {
    // Pre-join: only JOIN_ROOM is accepted from a session with no identity
    // yet (§4.8 step 1); everything else from an unjoined session is ignored.
    if session.user_id().is_none() {
        if let ClientMessage::JoinRoom(payload) = message {
            handle_join(hub, session, payload).await;
        }
        return;
    }

    match message {
        ClientMessage::JoinRoom(_) => {}
        ClientMessage::ChatMessage(payload) => handle_chat(hub, session, payload.message).await,
        ClientMessage::StreamReady(_) => handle_stream_ready(hub, session).await,
        ClientMessage::ViewerReady(_) => handle_viewer_ready(hub, session).await,
        ClientMessage::Offer(payload) => relay(hub, session, "OFFER", payload).await,
        ClientMessage::Answer(payload) => relay(hub, session, "ANSWER", payload).await,
        ClientMessage::IceCandidate(payload) => relay(hub, session, "ICE_CANDIDATE", payload).await,
    }
}

async fn handle_join(hub: &Hub, session: &Arc<Session>, payload: crate::protocol::JoinRoomPayload) {
    let role = match Role::parse(&payload.role) {
        Some(role) => role,
        None => {
            let err = JoinError::InvalidRole(payload.role.clone());
            send(session, ServerMessage::Error(ErrorPayload::from(&err))).await;
            return;
        }
    };

    // Username must be non-empty after trimming (§3 data model); no wire
    // ERROR code exists for this, so an empty/blank name is dropped the
    // same way a malformed frame is, rather than answered (§7.1).
    let username = payload.username.trim().to_string();
    if username.is_empty() {
        warn!(room_id = %payload.room_id, "dropping JOIN_ROOM with empty username");
        return;
    }

    match hub.join(payload.room_id.clone(), username, role, session.clone()) {
        Err(err) => {
            warn!(room_id = %payload.room_id, username = %payload.username, error = %err, "join rejected");
            send(session, ServerMessage::Error(ErrorPayload::from(&err))).await;
        }
        Ok(outcome) => {
            session.bind_identity(outcome.user.id.clone());
            info!(room_id = %payload.room_id, user_id = %outcome.user.id, role = ?role, "joined room");

            // ROOM_JOINED must precede any USER_JOINED/ROOM_STATE/
            // BROADCASTER_READY this session receives (§5 ordering).
            send(session, ServerMessage::RoomJoined(RoomJoinedPayload {
                room: outcome.room.clone(),
                user: outcome.user.clone(),
                messages: outcome.messages,
            }))
            .await;

            if role == Role::Viewer && outcome.room.stream_active {
                if let Some(broadcaster) = outcome.room.broadcaster.clone() {
                    send(session, ServerMessage::BroadcasterReady(BroadcasterReadyPayload {
                        broadcaster,
                    }))
                    .await;
                }
            }

            fan_out(&outcome.other_members, ServerMessage::UserJoined(UserJoinedPayload {
                user: outcome.user.clone(),
            }))
            .await;
            fan_out(&outcome.all_members, ServerMessage::RoomState(RoomStatePayload {
                room: outcome.room,
            }))
            .await;
        }
    }
}

async fn handle_chat(hub: &Hub, session: &Arc<Session>, body: crate::protocol::ChatMessageBody) {
    let Some(user_id) = session.user_id() else { return };
    let content = body.content.trim().to_string();
    if content.is_empty() {
        return;
    }
    if let Some(outcome) = hub.post_chat(user_id, content, body.kind, body.recipient_id) {
        fan_out(&outcome.recipients, ServerMessage::ChatMessageReceived(ChatMessageReceivedPayload {
            message: outcome.entry,
        }))
        .await;
    }
}

async fn handle_stream_ready(hub: &Hub, session: &Arc<Session>) {
    let Some(user_id) = session.user_id() else { return };
    match hub.stream_ready(user_id) {
        Ok(outcome) => {
            fan_out(&outcome.viewers, ServerMessage::BroadcasterReady(BroadcasterReadyPayload {
                broadcaster: outcome.broadcaster,
            }))
            .await;
        }
        Err(RendezvousError::NotBroadcaster(_)) => {
            warn!(user_id, "STREAM_READY from a non-broadcaster, dropping");
        }
        Err(e) => warn!(user_id, error = %e, "STREAM_READY rejected"),
    }
}

async fn handle_viewer_ready(hub: &Hub, session: &Arc<Session>) {
    let Some(user_id) = session.user_id() else { return };
    match hub.viewer_ready(user_id) {
        Ok(outcome) => {
            if let Some(broadcaster_session) = outcome.broadcaster_session {
                send(&broadcaster_session, ServerMessage::ViewerReady(ViewerReadyEventPayload {
                    viewer: outcome.viewer,
                }))
                .await;
            }
        }
        Err(RendezvousError::NotViewer(_)) => {
            warn!(user_id, "VIEWER_READY from a non-viewer, dropping");
        }
        Err(e) => warn!(user_id, error = %e, "VIEWER_READY rejected"),
    }
}

/// C6: forward OFFER/ANSWER/ICE_CANDIDATE, stamping the resolved sender
/// rather than trusting the payload's claimed `sender` (§4.6, §9).
async fn relay(hub: &Hub, session: &Arc<Session>, kind: &str, payload: SignalPayload) {
    let Some(sender_id) = session.user_id() else { return };
    let Some(target) = hub.resolve_receiver(&payload.receiver) else {
        warn!(sender_id, receiver = %payload.receiver, kind, "relay target not found, dropping");
        return;
    };

    let resolved = SignalPayload {
        room_id: payload.room_id,
        sender: sender_id.to_string(),
        receiver: payload.receiver,
        data: payload.data,
    };

    let message = match kind {
        "OFFER" => ServerMessage::Offer(resolved),
        "ANSWER" => ServerMessage::Answer(resolved),
        _ => ServerMessage::IceCandidate(resolved),
    };
    send(&target, message).await;
}

async fn depart(hub: &Hub, session: &Arc<Session>) {
    let Some(user_id) = session.user_id() else { return };
    let Some(outcome) = hub.part(user_id) else { return };

    // Nothing to fan out to once the room (and everyone in it) is gone.
    let Some(room) = outcome.room else { return };

    fan_out(&outcome.remaining_members, ServerMessage::UserLeft(UserLeftPayload {
        user: outcome.user,
        room: room.clone(),
    }))
    .await;
    fan_out(&outcome.remaining_members, ServerMessage::RoomState(RoomStatePayload { room })).await;
}

async fn send(session: &Arc<Session>, message: ServerMessage) {
    let envelope = OutboundEnvelope::new(message);
    if let Err(e) = session.send(&envelope).await {
        warn!(session_id = %session.id, error = %e, "failed to deliver envelope");
    }
}

/// Fan-out helper (§4.8): write to every target session with the hub lock
/// already released (targets are collected while locked, sent while not).
async fn fan_out(targets: &[Arc<Session>], message: ServerMessage) {
    let envelope = OutboundEnvelope::new(message);
    for target in targets {
        if let Err(e) = target.send(&envelope).await {
            warn!(session_id = %target.id, error = %e, "failed to deliver fan-out envelope");
        }
    }
}
