//! Wire payloads for the two events that need an operator round-trip. Kept
//! independent of `parachute-permission`'s richer internal types so this
//! crate has no dependency on the permission crate; the Orchestrator
//! translates between the two.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantSuggestionPayload {
    pub scope: String,
    pub pattern: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequestPayload {
    pub request_id: String,
    pub session_id: Uuid,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub file_path: Option<String>,
    pub suggestions: Vec<GrantSuggestionPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionPayload {
    pub question: String,
    #[serde(default)]
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuestionPayload {
    pub request_id: String,
    pub session_id: Uuid,
    pub tool_use_id: String,
    pub questions: Vec<QuestionPayload>,
}
