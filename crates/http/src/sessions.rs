//! `GET/DELETE/POST/PATCH /api/sessions/*` (§6): REST surface over the
//! Session Store.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use parachute_session::{BashPolicy, Session, TrustLevel};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn parse_uuid(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid session id: {raw}")))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Session>>> {
    Ok(Json(state.sessions.list()?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Session>> {
    let id = parse_uuid(&id)?;
    Ok(Json(state.sessions.get(id)?))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let id = parse_uuid(&id)?;
    state.sessions.delete(id)?;
    Ok(StatusCode::OK)
}

pub async fn archive(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Session>> {
    let id = parse_uuid(&id)?;
    Ok(Json(state.sessions.archive(id)?))
}

pub async fn unarchive(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Session>> {
    let id = parse_uuid(&id)?;
    Ok(Json(state.sessions.unarchive(id)?))
}

/// Consumes a pairing-flow "pending session" (§4.5): clears the
/// `pending_initialization` flag so subsequent turns route normally.
pub async fn activate(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Session>> {
    let id = parse_uuid(&id)?;
    let session = state.sessions.update(id, |s| {
        s.metadata.remove("pending_initialization");
    })?;
    Ok(Json(session))
}

pub async fn patch_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<BTreeMap<String, Value>>,
) -> ApiResult<Json<Session>> {
    let id = parse_uuid(&id)?;
    let session = state.sessions.update(id, |s| {
        for (key, value) in patch {
            s.metadata.insert(key, value);
        }
    })?;
    Ok(Json(session))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    pub trust_level: Option<TrustLevel>,
    pub read: Option<Vec<String>>,
    pub write: Option<Vec<String>>,
    pub allowed_paths: Option<Vec<String>>,
    pub bash: Option<BashPolicy>,
}

pub async fn patch_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ConfigPatch>,
) -> ApiResult<Json<Session>> {
    let id = parse_uuid(&id)?;
    let session = state.sessions.update(id, |s| {
        let mut perms = s.permissions();
        if let Some(trust_level) = patch.trust_level {
            perms.trust_level = trust_level;
        }
        if let Some(read) = patch.read {
            perms.read = read;
        }
        if let Some(write) = patch.write {
            perms.write = write;
        }
        if let Some(allowed_paths) = patch.allowed_paths {
            perms.allowed_paths = allowed_paths;
        }
        if let Some(bash) = patch.bash {
            perms.bash = bash;
        }
        s.set_permissions(&perms);
    })?;
    Ok(Json(session))
}
