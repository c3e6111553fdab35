//! C8 SSE Endpoint Layer (§4.6, §6): the HTTP surface the rest of the
//! server's subsystems sit behind.

mod auth;
mod chat;
mod error;
mod health;
mod permissions;
mod sessions;
mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::middleware;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the full `/api/*` surface, with `/api/health` carved out of the
/// auth middleware (§6: "health is always reachable, even under `always`").
pub fn router(state: AppState) -> Router {
    let gated = Router::new()
        .route("/api/chat", post(chat::start_chat))
        .route("/api/chat/{id}/abort", post(chat::abort_chat))
        .route("/api/chat/{id}/stream-status", get(chat::stream_status))
        .route("/api/chat/{id}/join", get(chat::join_chat))
        .route("/api/chat/{id}/answer", post(chat::answer_chat))
        .route(
            "/api/sessions/{id}/permissions/grant",
            post(permissions::grant),
        )
        .route(
            "/api/sessions/{id}/permissions/deny",
            post(permissions::deny),
        )
        .route("/api/sessions", get(sessions::list))
        .route("/api/sessions/{id}", get(sessions::get).delete(sessions::delete))
        .route("/api/sessions/{id}/archive", post(sessions::archive))
        .route("/api/sessions/{id}/unarchive", post(sessions::unarchive))
        .route("/api/sessions/{id}/activate", post(sessions::activate))
        .route("/api/sessions/{id}/metadata", patch(sessions::patch_metadata))
        .route("/api/sessions/{id}/config", patch(sessions::patch_config))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    let ungated = Router::new().route("/api/health", get(health::health));

    gated
        .merge(ungated)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
