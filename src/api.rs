//! Administrative and read-only REST endpoints (§6.1).
//!
//! These sit alongside the signaling WebSocket but never touch the hub's
//! mutex for longer than one `Hub` method call — same "no I/O under the
//! lock" discipline as the dispatcher, just without anything to fan out.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::room::{ChatEntry, RoomSnapshot};
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomSnapshot>> {
    Json(state.hub.list_rooms())
}

#[derive(Deserialize)]
pub struct MessagesQuery {
    /// Parsed manually (rather than as `Option<usize>`) so a malformed value
    /// surfaces through the teacher's `ApiError` JSON envelope instead of
    /// axum's default query-rejection body.
    limit: Option<String>,
}

pub async fn room_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<ChatEntry>>, ApiError> {
    let limit = match query.limit {
        None => state.default_chat_tail,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ApiError::bad_request(format!("limit '{raw}' is not a non-negative integer")))?,
    };
    Ok(Json(state.hub.room_messages(&room_id, limit)))
}
