//! Adapts the Permission Handler (C3) to the `ToolGate` trait a concrete
//! Agent Runtime calls back into, so `parachute-agent-runtime` never needs
//! to depend on `parachute-permission`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use parachute_agent_runtime::{ToolGate, ToolGateDecision};
use parachute_permission::{PermissionDecision, PermissionHandler, QuestionSpec};

pub struct PermissionGate(pub Arc<PermissionHandler>);

#[async_trait]
impl ToolGate for PermissionGate {
    async fn check(&self, tool_name: &str, input: Value, tool_use_id: &str) -> ToolGateDecision {
        match self.0.check_tool(tool_name, input, tool_use_id).await {
            PermissionDecision::Allow { updated_input } => ToolGateDecision::Allow(updated_input),
            PermissionDecision::Deny { message } => ToolGateDecision::Deny(message),
        }
    }

    async fn ask_user(&self, tool_use_id: &str, questions: Value) -> HashMap<String, Value> {
        let parsed: Vec<QuestionSpec> = serde_json::from_value(questions).unwrap_or_default();
        self.0.ask_user_question(tool_use_id, parsed).await
    }
}
