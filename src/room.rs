//! Room registry (C4) and chat log (C5).
//!
//! The room registry owns every `Room` and its chat log; the identity
//! registry (`hub.rs`) owns `User` records and resolves the ids a `Room`
//! stores in `broadcaster`/`viewers` back into full users for snapshots.
//! Keeping `Room` ignorant of `User`/`Session` avoids a circular borrow
//! between the two registries — both live under the hub's single mutex
//! anyway (§5), so there is no concurrency reason to couple them.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::User;

/// Chat history is trimmed on append rather than capped only on read —
/// the "simple" option spec.md's open question allows, and it keeps a
/// long-lived room's memory bounded the same way the teacher's capacity-
/// bounded broadcast channels do.
pub const CHAT_LOG_CAPACITY: usize = 50;

/// Default tail size when a caller (REST or `ROOM_JOINED`) doesn't specify one.
pub const DEFAULT_CHAT_TAIL: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Public,
    Private,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub content: String,
    pub kind: ChatKind,
    #[serde(default)]
    pub recipient_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-room bounded append-only sequence of chat entries (C5).
#[derive(Debug, Default)]
pub struct ChatLog {
    entries: VecDeque<ChatEntry>,
}

impl ChatLog {
    pub fn new() -> Self {
        ChatLog {
            entries: VecDeque::with_capacity(CHAT_LOG_CAPACITY),
        }
    }

    pub fn append(&mut self, entry: ChatEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > CHAT_LOG_CAPACITY {
            self.entries.pop_front();
        }
    }

    /// Most-recent-last tail, capped at `limit` (and at the retained history).
    pub fn tail(&self, limit: usize) -> Vec<ChatEntry> {
        let limit = limit.min(self.entries.len());
        self.entries
            .iter()
            .skip(self.entries.len() - limit)
            .cloned()
            .collect()
    }
}

/// Room state (§3): membership, role, stream-active flag, chat log.
///
/// Created lazily by the first broadcaster that joins; destroyed once both
/// `broadcaster` is absent and `viewers` is empty (§4.4 `part`).
pub struct Room {
    pub id: String,
    pub name: String,
    pub broadcaster: Option<String>,
    /// Join order; used only for deterministic iteration (§3).
    pub viewers: Vec<String>,
    pub stream_active: bool,
    pub chat: ChatLog,
}

impl Room {
    pub fn new(id: String) -> Self {
        let name = format!("Room {id}");
        Room {
            id,
            name,
            broadcaster: None,
            viewers: Vec::new(),
            stream_active: false,
            chat: ChatLog::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.broadcaster.is_none() && self.viewers.is_empty()
    }

    /// Broadcaster first (if present), then viewers in join order — the
    /// iteration order `snapshot` (§4.4) and the hub's fan-out helper use.
    pub fn member_ids(&self) -> impl Iterator<Item = &String> {
        self.broadcaster.iter().chain(self.viewers.iter())
    }
}

/// Serializable snapshot of a `Room` with membership resolved to full users,
/// sent to clients in `ROOM_JOINED`/`ROOM_STATE`/`USER_LEFT` payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: String,
    pub name: String,
    pub broadcaster: Option<User>,
    pub viewers: Vec<User>,
    pub stream_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> ChatEntry {
        ChatEntry {
            id: id.to_string(),
            room_id: "r".to_string(),
            sender_id: "u1".to_string(),
            sender_username: "alice".to_string(),
            content: "hi".to_string(),
            kind: ChatKind::Public,
            recipient_id: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn chat_log_trims_on_append() {
        let mut log = ChatLog::new();
        for i in 0..(CHAT_LOG_CAPACITY + 10) {
            log.append(entry(&i.to_string()));
        }
        let tail = log.tail(1000);
        assert_eq!(tail.len(), CHAT_LOG_CAPACITY);
        assert_eq!(tail.last().unwrap().id, (CHAT_LOG_CAPACITY + 9).to_string());
    }

    #[test]
    fn chat_log_tail_respects_limit() {
        let mut log = ChatLog::new();
        for i in 0..5 {
            log.append(entry(&i.to_string()));
        }
        let tail = log.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].id, "3");
        assert_eq!(tail[1].id, "4");
    }

    #[test]
    fn new_room_is_empty() {
        let room = Room::new("r1".to_string());
        assert!(room.is_empty());
        assert_eq!(room.name, "Room r1");
    }

    #[test]
    fn room_not_empty_with_broadcaster() {
        let mut room = Room::new("r1".to_string());
        room.broadcaster = Some("u1".to_string());
        assert!(!room.is_empty());
    }
}
