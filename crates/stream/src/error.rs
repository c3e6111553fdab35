use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("no stream for session {0}")]
    NoStream(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;
