use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the orchestrator should behave when a caller supplies an unknown
/// `session_id` (§4.4 "Recovery modes"). This is the one field of
/// `TurnRequest` the `/api/chat` wire body names directly (`recoveryMode`),
/// so it carries its own `serde` derive rather than making the HTTP layer
/// hand-translate a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Start a fresh session and emit a `session_unavailable` notice.
    #[default]
    FreshSession,
    /// Inject a stored context summary into the prompt and continue.
    ContextSummary,
}

/// One `/api/chat` request, already past JSON parsing (§6).
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub message: String,
    pub session_id: Option<Uuid>,
    pub module: String,
    pub system_prompt: Option<String>,
    pub working_directory: Option<PathBuf>,
    pub contexts: Vec<String>,
    pub recovery_mode: RecoveryMode,
    pub attachments: Vec<String>,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: None,
            module: "chat".to_string(),
            system_prompt: None,
            working_directory: None,
            contexts: Vec::new(),
            recovery_mode: RecoveryMode::default(),
            attachments: Vec::new(),
        }
    }

    /// `sessionId=="new"` is normalized to "no session" at the HTTP layer;
    /// this is the orchestrator-side mirror for callers that construct a
    /// `TurnRequest` directly (e.g. the bot connector).
    pub fn with_session(mut self, session_id: Option<Uuid>) -> Self {
        self.session_id = session_id;
        self
    }
}
