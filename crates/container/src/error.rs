use thiserror::Error;

/// §7 taxonomy members this crate can raise.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container runtime unavailable")]
    SandboxUnavailable,

    #[error("container exceeded its turn deadline")]
    Timeout,

    #[error("container was killed for out-of-memory (exit 137)")]
    Oom,

    #[error("malformed event from container stdout: {0}")]
    ProtocolError(String),

    #[error("container runtime operation failed: {0}")]
    RuntimeFailure(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ContainerError>;
