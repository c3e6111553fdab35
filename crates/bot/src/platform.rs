//! The seam between the connector supervisor (state machine, backoff,
//! pairing, per-chat locking — all platform-agnostic) and a concrete
//! platform's transport.

use async_trait::async_trait;

use parachute_session::ChatType;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: String,
    pub chat_type: ChatType,
    pub user_id: String,
    pub user_display: String,
    pub text: String,
    pub message_id: String,
    /// `true` if the message contains a mention of the bot or its
    /// configured trigger keyword; consulted for `mention_only` groups.
    pub mentions_bot: bool,
}

/// Whether a transport failure is authentication-class (fast-fail, §4.5)
/// or an ordinary transient blip (retry with backoff).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Auth,
    Transient,
}

#[async_trait]
pub trait Platform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Blocks until at least one inbound message is available, platform
    /// messages arrive as a batch, or an error occurs. Returning `Ok(vec![])`
    /// is a valid no-op poll.
    async fn receive(&mut self) -> Result<Vec<InboundMessage>>;

    async fn send(&self, chat_id: &str, text: &str) -> Result<()>;

    /// The hard cap a single outgoing message may not exceed before
    /// [`crate::split::split_response`] must be used.
    fn max_message_len(&self) -> usize;

    fn classify_error(&self, err: &crate::error::BotError) -> ErrorClass {
        match err {
            crate::error::BotError::Auth(_) => ErrorClass::Auth,
            _ => ErrorClass::Transient,
        }
    }
}
