use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("session not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("a stream is already active for this chat")]
    Conflict,

    #[error("agent runtime failed: {0}")]
    RuntimeFailure(String),

    #[error("container runtime unavailable")]
    SandboxUnavailable,

    #[error(transparent)]
    Session(#[from] parachute_session::SessionStoreError),

    #[error(transparent)]
    Container(#[from] parachute_container::ContainerError),

    #[error(transparent)]
    Runtime(#[from] parachute_agent_runtime::AgentRuntimeError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
