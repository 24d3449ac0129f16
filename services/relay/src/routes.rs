use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Builds the relay's router: the HTTP endpoints, the browser channel and the page.
pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    // The page may be served from elsewhere during development.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::home))
        .route("/init_session", post(handlers::init_session))
        .route("/start", get(handlers::start))
        .route("/send", post(handlers::send))
        .route("/truncate_audio", post(handlers::truncate_audio))
        .route("/conversation_item_create", post(handlers::conversation_item_create))
        .route("/status", get(handlers::status))
        .route("/ws", get(handlers::browser_channel))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
