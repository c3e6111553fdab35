//! `/api/sessions/{id}/permissions/*` (§6): operator grant/deny surface for
//! the Permission Handler registered against that session's in-flight turn.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn parse_uuid(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid session id: {raw}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantBody {
    pub request_id: String,
    #[serde(default)]
    pub pattern: Option<String>,
}

pub async fn grant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<GrantBody>,
) -> ApiResult<StatusCode> {
    let session_id = parse_uuid(&id)?;
    if state.permissions.grant(session_id, &body.request_id, body.pattern).await {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::NotFound(format!("no pending permission request {}", body.request_id)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenyBody {
    pub request_id: String,
}

pub async fn deny(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DenyBody>,
) -> ApiResult<StatusCode> {
    let session_id = parse_uuid(&id)?;
    if state.permissions.deny(session_id, &body.request_id).await {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::NotFound(format!("no pending permission request {}", body.request_id)))
    }
}
