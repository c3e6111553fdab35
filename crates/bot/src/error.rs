use thiserror::Error;

/// The subset of §7's taxonomy a connector's transport can raise: a
/// transient network blip (retry with backoff) or an authentication-class
/// failure (fast-fail straight to `Failed`, see `state::ConnectorState`).
#[derive(Debug, Error)]
pub enum BotError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BotError>;
