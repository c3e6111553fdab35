//! §6 "Auth": three modes, `x-api-key` or `Authorization: Bearer` header.
//! `/api/health` is routed outside this middleware entirely so operational
//! probes never need a key regardless of mode.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use parachute_config::AuthMode;

use crate::error::ApiError;
use crate::state::AppState;

fn extract_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

pub async fn require_api_key(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match state.config.server.auth_mode {
        AuthMode::Disabled => return next.run(request).await,
        AuthMode::Remote => {
            let is_loopback = connect_info.map(|ci| ci.0.ip().is_loopback()).unwrap_or(false);
            if is_loopback {
                return next.run(request).await;
            }
        }
        AuthMode::Always => {}
    }

    let key = extract_key(request.headers());
    match key {
        Some(key) if state.config.server.api_keys.iter().any(|k| k == &key) => next.run(request).await,
        _ => ApiError::Unauthorized.into_response(),
    }
}
