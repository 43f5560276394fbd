use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use signalhub::{build_cors_layer, build_router, config, hub::Hub, AppState};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let log_level = std::env::var("SIGNALHUB_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)))
        .init();

    let cfg = config::Config::from_env();
    let bind_addr = cfg.bind_addr.clone();
    let cors = build_cors_layer(&cfg.allowed_origins);

    let state = AppState { hub: Arc::new(Hub::new()), default_chat_tail: cfg.chat_history_page_size };
    let app = build_router(state, cors);

    info!("signalhub listening on http://{bind_addr}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
