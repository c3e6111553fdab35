//! C9 Bot Connector Supervisor (§4.5): reconnecting platform adapters,
//! chat-scoped serialization, pairing, and per-chat history buffers, all
//! generic over a concrete [`Platform`] transport.

mod backoff;
mod connector;
mod error;
mod health;
mod history;
mod platform;
mod split;
mod state;

pub use backoff::{full_jitter_delay, MAX_CONSECUTIVE_FAILURES};
pub use connector::{Connector, ConnectorConfig, MentionMode};
pub use error::{BotError, Result};
pub use health::{sanitize_error, ConnectorHealth};
pub use history::{format_for_prompt, sanitize_display_name, GroupHistoryBuffer, GroupMessage};
pub use platform::{ErrorClass, InboundMessage, Platform};
pub use split::split_response;
pub use state::ConnectorState;
