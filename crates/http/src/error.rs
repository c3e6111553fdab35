//! §7 "Error type design": the taxonomy→status mapping, implemented directly
//! on an `IntoResponse` impl so handlers return `Result<T, ApiError>`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use parachute_orchestrator::OrchestratorError;
use parachute_session::SessionStoreError;
use parachute_stream::StreamError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("access denied: {0}")]
    Denied(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("request timed out")]
    Timeout,
    #[error("agent runtime failed: {0}")]
    RuntimeFailure(String),
    #[error("container runtime unavailable")]
    SandboxUnavailable,
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Denied(_) => StatusCode::FORBIDDEN,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::SandboxUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RuntimeFailure(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": status.canonical_reason().unwrap_or("error"), "message": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<SessionStoreError> for ApiError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::NotFound(id) => ApiError::NotFound(format!("session {id}")),
            SessionStoreError::PairingNotFound(id) => ApiError::NotFound(format!("pairing request {id}")),
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound(id) => ApiError::NotFound(format!("session {id}")),
            OrchestratorError::Conflict => ApiError::Conflict("a stream is already active".to_string()),
            OrchestratorError::SandboxUnavailable => ApiError::SandboxUnavailable,
            OrchestratorError::RuntimeFailure(msg) => ApiError::RuntimeFailure(msg),
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::NoStream(key) => ApiError::NotFound(format!("stream {key}")),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_the_documented_status_codes() {
        assert_eq!(ApiError::Denied("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ApiError::SandboxUnavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::RuntimeFailure("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn session_store_not_found_maps_to_api_not_found() {
        let err: ApiError = SessionStoreError::NotFound(uuid::Uuid::new_v4()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn orchestrator_conflict_maps_to_api_conflict() {
        let err: ApiError = OrchestratorError::Conflict.into();
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
