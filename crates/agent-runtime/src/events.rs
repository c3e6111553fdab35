//! The event taxonomy a turn streams through (§4.4 "Event flow contract").
//! This crate owns the taxonomy because C5 itself is opaque/external; the
//! Orchestrator (C6) is what actually produces and enriches these events by
//! driving whatever concrete runtime implements `AgentRuntime`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::requests::{PermissionRequestPayload, UserQuestionPayload};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseEvent {
    pub tool_use_id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultEvent {
    pub tool_use_id: String,
    pub name: String,
    pub success: bool,
    pub output: serde_json::Value,
}

/// §4.4 event taxonomy table, tagged by `type` for the SSE wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// `notice` carries a recovery-mode explanation (§4.4 "Recovery modes")
    /// when the caller's `session_id` was unknown and a fresh session had
    /// to be substituted; `None` on the ordinary path.
    Session {
        session_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        notice: Option<String>,
    },
    Model { model: String },
    Init { capabilities: serde_json::Value },
    Text { delta: String },
    Thinking { delta: String },
    ToolUse(ToolUseEvent),
    ToolResult(ToolResultEvent),
    PermissionRequest(PermissionRequestPayload),
    UserQuestion(UserQuestionPayload),
    Done { session_id: Uuid },
    Error { message: String },
    Aborted,
}

impl AgentEvent {
    /// `true` for the three terminal variants that close a stream (§4.4
    /// "exactly one terminal event closes the stream").
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Done { .. } | AgentEvent::Error { .. } | AgentEvent::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_terminal_variants_report_terminal() {
        assert!(AgentEvent::Done { session_id: Uuid::nil() }.is_terminal());
        assert!(AgentEvent::Error { message: "x".into() }.is_terminal());
        assert!(AgentEvent::Aborted.is_terminal());
        assert!(!AgentEvent::Text { delta: "x".into() }.is_terminal());
    }

    #[test]
    fn wire_shape_tags_by_type_field() {
        let event = AgentEvent::Text { delta: "hi".into() };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["delta"], "hi");
    }
}
