use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentRuntimeError {
    #[error("agent runtime failed: {0}")]
    RuntimeFailure(String),

    #[error("turn was aborted")]
    Aborted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentRuntimeError>;
