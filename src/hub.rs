//! Hub dispatcher's backing state (C3 identity registry + C4 room registry),
//! the signaling relay (C6) and rendezvous coordinator (C7).
//!
//! Per §5, the three registries (identity, room, chat-log) are one logical
//! unit of state behind a single mutex — splitting them risks a relay
//! finding a receiver the room registry has just forgotten. `Hub::state` is
//! that mutex. Every method here completes under a short critical section
//! and performs no I/O while holding it; callers receive back `Arc<Session>`
//! handles to write to *after* the lock is released (the "collect targets
//! under lock, write outside lock" pattern §5 mandates).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::identity::{Role, User};
use crate::room::{ChatEntry, ChatKind, Room, RoomSnapshot, DEFAULT_CHAT_TAIL};
use crate::session::Session;

/// Semantic join failures (§4.4, §6.2 `ERROR` codes).
#[derive(Debug, Clone, thiserror::Error)]
pub enum JoinError {
    #[error("room '{0}' does not exist")]
    RoomNotFound(String),
    #[error("room '{0}' already has a broadcaster")]
    BroadcasterExists(String),
    #[error("username '{0}' is already taken in this room")]
    UserExists(String),
    #[error("'{0}' is not a valid role")]
    InvalidRole(String),
}

impl JoinError {
    /// The `ERROR` envelope's `code` field (§6.2).
    pub fn code(&self) -> &'static str {
        match self {
            JoinError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            JoinError::BroadcasterExists(_) => "BROADCASTER_EXISTS",
            JoinError::UserExists(_) => "USER_EXISTS",
            JoinError::InvalidRole(_) => "INVALID_ROLE",
        }
    }
}

/// Rendezvous (C7) failures — these are protocol violations (the dispatcher
/// drops the frame rather than replying with an `ERROR` envelope; §7.1).
#[derive(Debug, Clone, thiserror::Error)]
pub enum RendezvousError {
    #[error("user '{0}' has no identity")]
    UnknownUser(String),
    #[error("user '{0}' is not the broadcaster of their room")]
    NotBroadcaster(String),
    #[error("user '{0}' is not a viewer of their room")]
    NotViewer(String),
}

/// What `join` hands back to the dispatcher for `ROOM_JOINED` plus fan-out.
pub struct JoinOutcome {
    pub user: User,
    pub room: RoomSnapshot,
    pub messages: Vec<ChatEntry>,
    /// Every other member's session, for `USER_JOINED` fan-out.
    pub other_members: Vec<Arc<Session>>,
    /// Every member's session including the joiner, for `ROOM_STATE` fan-out.
    pub all_members: Vec<Arc<Session>>,
}

/// What `part` hands back for `USER_LEFT`/`ROOM_STATE` fan-out.
pub struct PartOutcome {
    pub user: User,
    /// `None` once the room itself has been torn down.
    pub room: Option<RoomSnapshot>,
    /// Remaining members' sessions (the departed user is already removed).
    pub remaining_members: Vec<Arc<Session>>,
}

pub struct ChatOutcome {
    pub entry: ChatEntry,
    /// Resolved recipients: every room member for public chat, or the
    /// sender plus the addressed recipient (if still present) for private.
    pub recipients: Vec<Arc<Session>>,
}

pub struct StreamReadyOutcome {
    pub broadcaster: User,
    pub viewers: Vec<Arc<Session>>,
}

pub struct ViewerReadyOutcome {
    pub viewer: User,
    /// `None` if the broadcaster has since left — the hub drops this
    /// silently per §7.3's stale-addressing policy.
    pub broadcaster_session: Option<Arc<Session>>,
}

/// One registered identity: the user record plus its owning session.
struct Identity {
    user: User,
    session: Arc<Session>,
}

#[derive(Default)]
struct HubState {
    rooms: HashMap<String, Room>,
    identities: HashMap<String, Identity>,
}

/// The process-wide signaling hub: identity registry, room registry, relay
/// and rendezvous coordinator, all behind one mutex (§5).
#[derive(Default)]
pub struct Hub {
    state: Mutex<HubState>,
}

impl Hub {
    pub fn new() -> Self {
        Hub::default()
    }

    /// C4.join. Atomic: invariants 1–6 hold at both boundaries of this call.
    pub fn join(
        &self,
        room_id: String,
        username: String,
        role: Role,
        session: Arc<Session>,
    ) -> Result<JoinOutcome, JoinError> {
        let mut state = self.state.lock().unwrap();
        let username_key = username.to_ascii_lowercase();

        match state.rooms.get(&room_id) {
            None => {
                if role != Role::Broadcaster {
                    return Err(JoinError::RoomNotFound(room_id));
                }
            }
            Some(room) => {
                if role == Role::Broadcaster && room.broadcaster.is_some() {
                    return Err(JoinError::BroadcasterExists(room_id));
                }
                let taken = room.member_ids().any(|uid| {
                    state
                        .identities
                        .get(uid)
                        .is_some_and(|id| id.user.username.to_ascii_lowercase() == username_key)
                });
                if taken {
                    return Err(JoinError::UserExists(username));
                }
            }
        }

        let user_id = Uuid::new_v4().to_string();
        let user = User {
            id: user_id.clone(),
            username,
            role,
            room_id: room_id.clone(),
        };

        let room = state
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(room_id.clone()));
        match role {
            Role::Broadcaster => room.broadcaster = Some(user_id.clone()),
            Role::Viewer => room.viewers.push(user_id.clone()),
        }
        let messages = room.chat.tail(DEFAULT_CHAT_TAIL);
        let broadcaster_id = room.broadcaster.clone();
        let viewer_ids = room.viewers.clone();
        let stream_active = room.stream_active;
        let name = room.name.clone();

        state.identities.insert(
            user_id.clone(),
            Identity {
                user: user.clone(),
                session,
            },
        );

        let snapshot = resolve_snapshot(
            room_id,
            name,
            &broadcaster_id,
            &viewer_ids,
            stream_active,
            &state.identities,
        );
        let other_members = resolve_sessions(&broadcaster_id, &viewer_ids, &state.identities, Some(&user_id));
        let all_members = resolve_sessions(&broadcaster_id, &viewer_ids, &state.identities, None);

        Ok(JoinOutcome {
            user,
            room: snapshot,
            messages,
            other_members,
            all_members,
        })
    }

    /// C4.part. Idempotent — a user id absent from the registry is a no-op.
    pub fn part(&self, user_id: &str) -> Option<PartOutcome> {
        let mut state = self.state.lock().unwrap();
        let Identity { user, .. } = state.identities.remove(user_id)?;

        let room_id = user.room_id.clone();
        let room_gone;
        let mut snapshot = None;
        let mut remaining_members = Vec::new();

        if let Some(room) = state.rooms.get_mut(&room_id) {
            if room.broadcaster.as_deref() == Some(user_id) {
                room.broadcaster = None;
                room.stream_active = false;
            }
            room.viewers.retain(|id| id != user_id);

            if room.is_empty() {
                state.rooms.remove(&room_id);
                room_gone = true;
            } else {
                room_gone = false;
            }
        } else {
            room_gone = true;
        }

        if !room_gone {
            let room = state.rooms.get(&room_id).expect("checked above");
            let broadcaster_id = room.broadcaster.clone();
            let viewer_ids = room.viewers.clone();
            let stream_active = room.stream_active;
            let name = room.name.clone();
            remaining_members =
                resolve_sessions(&broadcaster_id, &viewer_ids, &state.identities, None);
            snapshot = Some(resolve_snapshot(
                room_id,
                name,
                &broadcaster_id,
                &viewer_ids,
                stream_active,
                &state.identities,
            ));
        }

        Some(PartOutcome {
            user,
            room: snapshot,
            remaining_members,
        })
    }

    /// C4.snapshot — current room state with membership resolved.
    pub fn snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let state = self.state.lock().unwrap();
        let room = state.rooms.get(room_id)?;
        Some(resolve_snapshot(
            room.id.clone(),
            room.name.clone(),
            &room.broadcaster,
            &room.viewers,
            room.stream_active,
            &state.identities,
        ))
    }

    /// Room listing for `GET /rooms` (§6.1).
    pub fn list_rooms(&self) -> Vec<RoomSnapshot> {
        let state = self.state.lock().unwrap();
        state
            .rooms
            .values()
            .map(|room| {
                resolve_snapshot(
                    room.id.clone(),
                    room.name.clone(),
                    &room.broadcaster,
                    &room.viewers,
                    room.stream_active,
                    &state.identities,
                )
            })
            .collect()
    }

    /// `GET /rooms/{room_id}/messages?limit=N` (§6.1). Absent rooms yield `[]`.
    pub fn room_messages(&self, room_id: &str, limit: usize) -> Vec<ChatEntry> {
        let state = self.state.lock().unwrap();
        state
            .rooms
            .get(room_id)
            .map(|room| room.chat.tail(limit))
            .unwrap_or_default()
    }

    /// C8.3 `CHAT_MESSAGE`. `sender_id` must already own an identity — the
    /// dispatcher only reaches here post-join, so absence is an internal
    /// inconsistency rather than a client error; treat it as a silent drop.
    pub fn post_chat(
        &self,
        sender_id: &str,
        content: String,
        kind: ChatKind,
        recipient_id: Option<String>,
    ) -> Option<ChatOutcome> {
        let mut state = self.state.lock().unwrap();
        let sender = state.identities.get(sender_id)?.user.clone();
        let room = state.rooms.get_mut(&sender.room_id)?;

        let entry = ChatEntry {
            id: Uuid::new_v4().to_string(),
            room_id: sender.room_id.clone(),
            sender_id: sender.id.clone(),
            sender_username: sender.username.clone(),
            content,
            kind,
            recipient_id: recipient_id.clone(),
            timestamp: chrono::Utc::now(),
        };
        room.chat.append(entry.clone());

        let recipients = match (kind, recipient_id) {
            (ChatKind::Private, Some(recipient_id)) => {
                let sender_session = state.identities.get(sender_id).map(|id| id.session.clone());
                let recipient_session = state
                    .identities
                    .get(&recipient_id)
                    .map(|id| id.session.clone());
                let mut targets = Vec::new();
                if let Some(session) = recipient_session {
                    targets.push(session);
                }
                if let Some(session) = sender_session {
                    targets.push(session);
                }
                targets
            }
            _ => {
                let broadcaster_id = room.broadcaster.clone();
                let viewer_ids = room.viewers.clone();
                resolve_sessions(&broadcaster_id, &viewer_ids, &state.identities, None)
            }
        };

        Some(ChatOutcome { entry, recipients })
    }

    /// C8.4 `STREAM_READY`: valid only from the room's broadcaster.
    /// Idempotent — re-emits `BROADCASTER_READY` to every viewer even if
    /// `stream_active` was already `true` (§4.7).
    pub fn stream_ready(&self, user_id: &str) -> Result<StreamReadyOutcome, RendezvousError> {
        let mut state = self.state.lock().unwrap();
        let identity = state
            .identities
            .get(user_id)
            .ok_or_else(|| RendezvousError::UnknownUser(user_id.to_string()))?;
        let broadcaster = identity.user.clone();
        let room = state
            .rooms
            .get_mut(&broadcaster.room_id)
            .ok_or_else(|| RendezvousError::NotBroadcaster(user_id.to_string()))?;
        if room.broadcaster.as_deref() != Some(user_id) {
            return Err(RendezvousError::NotBroadcaster(user_id.to_string()));
        }
        room.stream_active = true;
        let viewer_ids = room.viewers.clone();

        let viewers = viewer_ids
            .iter()
            .filter_map(|id| state.identities.get(id).map(|i| i.session.clone()))
            .collect();

        Ok(StreamReadyOutcome {
            broadcaster,
            viewers,
        })
    }

    /// C8.5 `VIEWER_READY`: valid only from a viewer; forwarded to the
    /// room's broadcaster (or dropped if the broadcaster has since left).
    pub fn viewer_ready(&self, user_id: &str) -> Result<ViewerReadyOutcome, RendezvousError> {
        let state = self.state.lock().unwrap();
        let identity = state
            .identities
            .get(user_id)
            .ok_or_else(|| RendezvousError::UnknownUser(user_id.to_string()))?;
        let viewer = identity.user.clone();
        if viewer.role != Role::Viewer {
            return Err(RendezvousError::NotViewer(user_id.to_string()));
        }
        let broadcaster_session = state
            .rooms
            .get(&viewer.room_id)
            .and_then(|room| room.broadcaster.as_ref())
            .and_then(|id| state.identities.get(id))
            .map(|id| id.session.clone());

        Ok(ViewerReadyOutcome {
            viewer,
            broadcaster_session,
        })
    }

    /// C6 relay: resolve `receiver_id` to a live session. The caller (the
    /// dispatcher) stamps `sender` with the Session's bound identity, never
    /// the claimed value in the payload (§4.6, §9).
    pub fn resolve_receiver(&self, receiver_id: &str) -> Option<Arc<Session>> {
        let state = self.state.lock().unwrap();
        state.identities.get(receiver_id).map(|id| id.session.clone())
    }
}

fn resolve_snapshot(
    id: String,
    name: String,
    broadcaster_id: &Option<String>,
    viewer_ids: &[String],
    stream_active: bool,
    identities: &HashMap<String, Identity>,
) -> RoomSnapshot {
    RoomSnapshot {
        id,
        name,
        broadcaster: broadcaster_id
            .as_ref()
            .and_then(|id| identities.get(id))
            .map(|identity| identity.user.clone()),
        viewers: viewer_ids
            .iter()
            .filter_map(|id| identities.get(id).map(|identity| identity.user.clone()))
            .collect(),
        stream_active,
    }
}

/// Resolve "all room members" (broadcaster ∪ viewers) to live sessions,
/// optionally excluding one user id (the "exclude self" fan-out parameter
/// in §4.8). Unknown ids are skipped — they self-heal on the next pass
/// once `part` catches up (§7).
fn resolve_sessions(
    broadcaster_id: &Option<String>,
    viewer_ids: &[String],
    identities: &HashMap<String, Identity>,
    exclude: Option<&str>,
) -> Vec<Arc<Session>> {
    broadcaster_id
        .iter()
        .chain(viewer_ids.iter())
        .filter(|id| exclude != Some(id.as_str()))
        .filter_map(|id| identities.get(id).map(|identity| identity.session.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use tokio::sync::mpsc;

    fn test_session() -> (Arc<Session>, mpsc::UnboundedReceiver<String>) {
        Session::for_test()
    }

    #[test]
    fn broadcaster_creates_room() {
        let hub = Hub::new();
        let (session, _rx) = test_session();
        let outcome = hub
            .join("r".to_string(), "Alice".to_string(), Role::Broadcaster, session)
            .unwrap();
        assert_eq!(outcome.room.broadcaster.as_ref().unwrap().username, "Alice");
        assert!(outcome.room.viewers.is_empty());
        assert!(outcome.messages.is_empty());
    }

    #[test]
    fn viewer_join_nonexistent_room_fails() {
        let hub = Hub::new();
        let (session, _rx) = test_session();
        let err = hub
            .join("q".to_string(), "Bob".to_string(), Role::Viewer, session)
            .unwrap_err();
        assert_eq!(err.code(), "ROOM_NOT_FOUND");
        assert!(hub.snapshot("q").is_none());
    }

    #[test]
    fn duplicate_username_case_insensitive_fails() {
        let hub = Hub::new();
        let (s1, _rx1) = test_session();
        hub.join("r".to_string(), "Alice".to_string(), Role::Broadcaster, s1)
            .unwrap();
        let (s2, _rx2) = test_session();
        let err = hub
            .join("r".to_string(), "ALICE".to_string(), Role::Viewer, s2)
            .unwrap_err();
        assert_eq!(err.code(), "USER_EXISTS");
    }

    #[test]
    fn second_broadcaster_rejected() {
        let hub = Hub::new();
        let (s1, _rx1) = test_session();
        hub.join("r".to_string(), "Alice".to_string(), Role::Broadcaster, s1)
            .unwrap();
        let (s2, _rx2) = test_session();
        let err = hub
            .join("r".to_string(), "Bob".to_string(), Role::Broadcaster, s2)
            .unwrap_err();
        assert_eq!(err.code(), "BROADCASTER_EXISTS");
    }

    #[test]
    fn rendezvous_ordering() {
        let hub = Hub::new();
        let (s1, _rx1) = test_session();
        let bcaster = hub
            .join("r".to_string(), "Alice".to_string(), Role::Broadcaster, s1)
            .unwrap()
            .user;
        let (s2, _rx2) = test_session();
        let join2 = hub
            .join("r".to_string(), "Bob".to_string(), Role::Viewer, s2)
            .unwrap();
        assert!(!join2.room.stream_active);

        let ready = hub.stream_ready(&bcaster.id).unwrap();
        assert_eq!(ready.viewers.len(), 1);

        let viewer_id = join2.user.id.clone();
        let vr = hub.viewer_ready(&viewer_id).unwrap();
        assert!(vr.broadcaster_session.is_some());
    }

    #[test]
    fn late_viewer_sees_active_stream() {
        let hub = Hub::new();
        let (s1, _rx1) = test_session();
        let bcaster = hub
            .join("r".to_string(), "Alice".to_string(), Role::Broadcaster, s1)
            .unwrap()
            .user;
        hub.stream_ready(&bcaster.id).unwrap();

        let (s3, _rx3) = test_session();
        let join3 = hub
            .join("r".to_string(), "Carol".to_string(), Role::Viewer, s3)
            .unwrap();
        assert!(join3.room.stream_active);
    }

    #[test]
    fn broadcaster_leaving_clears_stream_active_but_keeps_room() {
        let hub = Hub::new();
        let (s1, _rx1) = test_session();
        let bcaster = hub
            .join("r".to_string(), "Alice".to_string(), Role::Broadcaster, s1)
            .unwrap()
            .user;
        hub.stream_ready(&bcaster.id).unwrap();
        let (s2, _rx2) = test_session();
        hub.join("r".to_string(), "Bob".to_string(), Role::Viewer, s2)
            .unwrap();

        let part = hub.part(&bcaster.id).unwrap();
        let room = part.room.unwrap();
        assert!(room.broadcaster.is_none());
        assert!(!room.stream_active);
        assert_eq!(part.remaining_members.len(), 1);
    }

    #[test]
    fn last_member_leaving_deletes_room() {
        let hub = Hub::new();
        let (s1, _rx1) = test_session();
        let bcaster = hub
            .join("r".to_string(), "Alice".to_string(), Role::Broadcaster, s1)
            .unwrap()
            .user;
        let part = hub.part(&bcaster.id).unwrap();
        assert!(part.room.is_none());
        assert!(hub.snapshot("r").is_none());
        assert!(hub.list_rooms().is_empty());
    }

    #[test]
    fn part_is_idempotent() {
        let hub = Hub::new();
        let (s1, _rx1) = test_session();
        let bcaster = hub
            .join("r".to_string(), "Alice".to_string(), Role::Broadcaster, s1)
            .unwrap()
            .user;
        assert!(hub.part(&bcaster.id).is_some());
        assert!(hub.part(&bcaster.id).is_none());
    }

    #[test]
    fn private_chat_targets_sender_and_recipient_only() {
        let hub = Hub::new();
        let (s1, _rx1) = test_session();
        let alice = hub
            .join("r".to_string(), "Alice".to_string(), Role::Broadcaster, s1)
            .unwrap()
            .user;
        let (s2, _rx2) = test_session();
        let bob = hub
            .join("r".to_string(), "Bob".to_string(), Role::Viewer, s2)
            .unwrap()
            .user;
        let (s3, _rx3) = test_session();
        hub.join("r".to_string(), "Carol".to_string(), Role::Viewer, s3)
            .unwrap();

        let outcome = hub
            .post_chat(&alice.id, "hi".to_string(), ChatKind::Private, Some(bob.id.clone()))
            .unwrap();
        assert_eq!(outcome.recipients.len(), 2);
    }

    #[test]
    fn public_chat_reaches_all_members() {
        let hub = Hub::new();
        let (s1, _rx1) = test_session();
        let alice = hub
            .join("r".to_string(), "Alice".to_string(), Role::Broadcaster, s1)
            .unwrap()
            .user;
        let (s2, _rx2) = test_session();
        hub.join("r".to_string(), "Bob".to_string(), Role::Viewer, s2)
            .unwrap();

        let outcome = hub
            .post_chat(&alice.id, "hi all".to_string(), ChatKind::Public, None)
            .unwrap();
        assert_eq!(outcome.recipients.len(), 2);
    }
}
