//! C5 Agent Runtime boundary: the event taxonomy a turn streams through,
//! the trait external backends implement, and an in-memory fake for tests.
//! The real backend is opaque and external to this system (§4.4) — nothing
//! here assumes a particular LLM or agent SDK.

mod error;
mod events;
mod fake;
mod options;
mod requests;
mod runtime;

pub use error::{AgentRuntimeError, Result};
pub use events::{AgentEvent, ToolResultEvent, ToolUseEvent};
pub use fake::FakeAgentRuntime;
pub use options::TurnOptions;
pub use requests::{
    GrantSuggestionPayload, PermissionRequestPayload, QuestionPayload, UserQuestionPayload,
};
pub use runtime::{AgentRuntime, EventStream, InterruptHandle, RunningTurn, ToolGate, ToolGateDecision};
