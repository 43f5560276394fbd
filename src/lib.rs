pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod identity;
pub mod protocol;
pub mod room;
pub mod session;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use hub::Hub;

/// Shared router state: the hub plus the handful of config values the REST
/// handlers need (§6.1, §6.3). Mirrors the teacher's `AppState` shape (one
/// struct of shared state behind `with_state`) without the fields that don't
/// apply here (no `jwt_secret`, no `webhooks`, no `analytics`).
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub default_chat_tail: usize,
}

pub fn build_cors_layer(allowed_origins: &str) -> CorsLayer {
    if allowed_origins == "*" {
        warn!("CORS: permissive mode (allow all origins) — not suitable for production");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<HeaderValue>().expect("invalid origin header value"))
            .collect();

        info!("CORS: restricted to {} origin(s)", origins.len());

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET])
            .allow_headers([HeaderName::from_static("content-type")])
    }
}

/// Build the full axum router: the signaling WebSocket (§6.2) plus the
/// read-only REST surface (§6.1), sharing one `AppState`.
pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/rooms", get(api::list_rooms))
        .route("/rooms/:room_id/messages", get(api::room_messages))
        .route("/ws", get(dispatcher::ws_handler))
        .layer(cors)
        .with_state(state)
}
