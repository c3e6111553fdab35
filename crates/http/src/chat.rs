//! `/api/chat/*` (§6): SSE turn dispatch, abort, status, join, and the
//! `AskUserQuestion` answer round-trip.

use std::collections::HashMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use parachute_orchestrator::{RecoveryMode, TurnRequest};
use parachute_session::SessionSource;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn parse_uuid(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid session id: {raw}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub contexts: Vec<String>,
    #[serde(default)]
    pub recovery_mode: RecoveryMode,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// `sessionId=="new"` (and absence) both mean "no session" (§6).
fn normalize_session_id(raw: Option<String>) -> ApiResult<Option<Uuid>> {
    match raw.as_deref() {
        None | Some("") | Some("new") => Ok(None),
        Some(other) => parse_uuid(other).map(Some),
    }
}

fn sse_stream(
    events: std::pin::Pin<Box<dyn futures::Stream<Item = parachute_agent_runtime::AgentEvent> + Send>>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let mapped = events.map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(payload))
    });
    Sse::new(mapped).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

pub async fn start_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> ApiResult<impl IntoResponse> {
    let session_id = normalize_session_id(body.session_id)?;

    let mut request = TurnRequest::new(body.message).with_session(session_id);
    if let Some(module) = body.module {
        request.module = module;
    }
    request.system_prompt = body.system_prompt;
    request.working_directory = body.working_directory.map(PathBuf::from);
    request.contexts = body.contexts;
    request.recovery_mode = body.recovery_mode;
    request.attachments = body.attachments;

    let handle = state.orchestrator.run_turn(request, SessionSource::Web).await?;
    let key = handle.session_id.to_string();

    let started = state.streams.start_stream(&key, handle.events, Some(handle.interrupt)).await;
    if !started {
        return Err(ApiError::Conflict(format!("a stream is already active for session {key}")));
    }

    let events = state.streams.subscribe(&key, true).await?;
    Ok(sse_stream(events))
}

pub async fn abort_chat(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    if state.streams.abort_stream(&id).await {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::NotFound(format!("no active stream for {id}")))
    }
}

pub async fn stream_status(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    let active = state.streams.has_active_stream(&id).await;
    let info = state.streams.get_stream_info(&id).await;
    Json(json!({
        "active": active,
        "sessionId": id,
        "info": info.map(|info| json!({
            "startedAt": info.started_at,
            "lastEventAt": info.last_event_at,
            "completed": info.completed,
            "subscriberCount": info.subscriber_count,
        })),
    }))
}

#[derive(Debug, Deserialize)]
pub struct JoinParams {
    #[serde(default = "default_true")]
    pub include_buffer: bool,
}

fn default_true() -> bool {
    true
}

pub async fn join_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<JoinParams>,
) -> ApiResult<impl IntoResponse> {
    let events = state.streams.subscribe(&id, params.include_buffer).await?;
    Ok(sse_stream(events))
}

#[derive(Debug, Deserialize)]
pub struct AnswerBody {
    pub request_id: String,
    #[serde(default)]
    pub answers: HashMap<String, Value>,
}

pub async fn answer_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AnswerBody>,
) -> ApiResult<StatusCode> {
    let session_id = parse_uuid(&id)?;
    if state.permissions.answer(session_id, &body.request_id, body.answers).await {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::NotFound(format!("no pending question {}", body.request_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_new_and_empty_session_id_all_normalize_to_none() {
        assert!(normalize_session_id(None).unwrap().is_none());
        assert!(normalize_session_id(Some("".to_string())).unwrap().is_none());
        assert!(normalize_session_id(Some("new".to_string())).unwrap().is_none());
    }

    #[test]
    fn a_real_uuid_parses_through() {
        let id = Uuid::new_v4();
        let parsed = normalize_session_id(Some(id.to_string())).unwrap();
        assert_eq!(parsed, Some(id));
    }

    #[test]
    fn garbage_session_id_is_a_bad_request_not_a_panic() {
        let err = normalize_session_id(Some("not-a-uuid".to_string())).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
