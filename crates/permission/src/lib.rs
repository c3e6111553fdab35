mod classify;
mod handler;
mod registry;
mod requests;

pub use classify::{classify, dangerous_command_reason, ToolClass};
pub use handler::{PermissionDecision, PermissionHandler, DEFAULT_APPROVAL_TIMEOUT, DEFAULT_QUESTION_TIMEOUT};
pub use registry::PermissionRegistry;
pub use requests::{
    suggest_grants, GrantSuggestion, PermissionEvent, PermissionRequestInfo, QuestionSpec,
    Resolution, UserQuestionInfo,
};
