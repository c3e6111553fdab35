use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use crate::runtime::ToolGate;

/// Effective per-turn options assembled by the Orchestrator (§4.4
/// "compute effective options") and handed to whichever `AgentRuntime` is
/// driving the turn.
#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub session_id: Option<Uuid>,
    pub message: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub working_directory: Option<PathBuf>,
    pub mcp_servers: Vec<String>,
    pub agents: Vec<String>,
    pub plugin_dirs: Vec<PathBuf>,
    pub allowed_tools: Vec<String>,
    pub resume_token: Option<String>,
    /// Installed by the Orchestrator so the runtime can route tool calls
    /// through the Permission Handler before executing them. `None` for
    /// runtimes (like the fake) that don't gate tool calls.
    pub tool_gate: Option<Arc<dyn ToolGate>>,
}

impl TurnOptions {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            session_id: None,
            message: message.into(),
            system_prompt: None,
            model: None,
            working_directory: None,
            mcp_servers: Vec::new(),
            agents: Vec::new(),
            plugin_dirs: Vec::new(),
            allowed_tools: Vec::new(),
            resume_token: None,
            tool_gate: None,
        }
    }
}
