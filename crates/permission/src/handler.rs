//! C3: synchronous in-stream gate on tool invocations.
//!
//! Grounded on the teacher's `crates/exec/src/lib.rs` approval-channel idiom
//! (`mpsc` request + `oneshot` resolution) generalized from a single global
//! policy into per-session pending-request maps, and on
//! `examples/original_source/computer/parachute/core/permission_handler.py`
//! for the exact decision procedure and suggestion-ladder semantics.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use parachute_session::{normalize_vault_path, DenyMatcher, SessionPermissions, TrustLevel};

use crate::classify::{classify, dangerous_command_reason, ToolClass};
use crate::requests::{
    suggest_grants, PermissionEvent, PermissionRequestInfo, QuestionSpec, Resolution,
    UserQuestionInfo,
};

/// Default timeout for a permission approval request (§3).
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(120);
/// Default timeout for an `AskUserQuestion` round-trip (§4.2).
pub const DEFAULT_QUESTION_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow { updated_input: Value },
    Deny { message: String },
}

struct PendingApproval {
    created_at: Instant,
    resolver: oneshot::Sender<Resolution>,
}

struct PendingQuestion {
    created_at: Instant,
    resolver: oneshot::Sender<HashMap<String, Value>>,
}

enum PermKind {
    Read,
    Write,
}

/// Bound to one session for the lifetime of one turn. The orchestrator
/// constructs one per turn, wires its `events` receiver into the stream, and
/// calls `force_resolve_all` when the turn ends (§9 "Cyclic structures").
pub struct PermissionHandler {
    session_id: Uuid,
    vault_root: PathBuf,
    permissions: RwLock<SessionPermissions>,
    deny: DenyMatcher,
    events: tokio::sync::mpsc::UnboundedSender<PermissionEvent>,
    pending: Mutex<HashMap<String, PendingApproval>>,
    pending_questions: Mutex<HashMap<String, PendingQuestion>>,
    approval_timeout: Duration,
    question_timeout: Duration,
    max_pending: usize,
}

impl PermissionHandler {
    pub fn new(
        session_id: Uuid,
        vault_root: PathBuf,
        permissions: SessionPermissions,
        deny: DenyMatcher,
        events: tokio::sync::mpsc::UnboundedSender<PermissionEvent>,
    ) -> Self {
        Self {
            session_id,
            vault_root,
            permissions: RwLock::new(permissions),
            deny,
            events,
            pending: Mutex::new(HashMap::new()),
            pending_questions: Mutex::new(HashMap::new()),
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
            question_timeout: DEFAULT_QUESTION_TIMEOUT,
            max_pending: 100,
        }
    }

    pub fn with_timeouts(mut self, approval: Duration, question: Duration) -> Self {
        self.approval_timeout = approval;
        self.question_timeout = question;
        self
    }

    /// Current snapshot, e.g. for persisting back into the session's
    /// metadata at turn close.
    pub fn permissions(&self) -> SessionPermissions {
        self.permissions.read().unwrap().clone()
    }

    /// §4.2 decision procedure, dispatched by `ToolClass`. `tool_use_id` is
    /// used to derive a stable request ID shared with the SSE event.
    pub async fn check_tool(
        &self,
        tool_name: &str,
        input: Value,
        tool_use_id: &str,
    ) -> PermissionDecision {
        let trust_level = self.permissions.read().unwrap().trust_level;

        match classify(tool_name) {
            ToolClass::AlwaysAllow => PermissionDecision::Allow { updated_input: input },
            ToolClass::AskUser => PermissionDecision::Deny {
                message: "AskUserQuestion must be routed through ask_user_question".to_string(),
            },
            ToolClass::Read => {
                self.check_path_permission(tool_name, input, tool_use_id, trust_level, PermKind::Read)
                    .await
            }
            ToolClass::Write => {
                self.check_path_permission(tool_name, input, tool_use_id, trust_level, PermKind::Write)
                    .await
            }
            ToolClass::Bash => self.check_bash_permission(input, tool_use_id, trust_level).await,
            ToolClass::Unknown => {
                if trust_level == TrustLevel::Sandboxed {
                    return PermissionDecision::Deny {
                        message: format!("sandboxed agents cannot use host tool: {tool_name}"),
                    };
                }
                if trust_level == TrustLevel::Direct {
                    PermissionDecision::Allow { updated_input: input }
                } else {
                    PermissionDecision::Deny {
                        message: format!("unknown tool: {tool_name}"),
                    }
                }
            }
        }
    }

    fn extract_path(input: &Value) -> Option<String> {
        input
            .get("file_path")
            .or_else(|| input.get("path"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    async fn check_path_permission(
        &self,
        tool_name: &str,
        input: Value,
        tool_use_id: &str,
        trust_level: TrustLevel,
        kind: PermKind,
    ) -> PermissionDecision {
        let Some(raw_path) = Self::extract_path(&input) else {
            return PermissionDecision::Deny {
                message: format!("{tool_name} call carries no path"),
            };
        };
        let relative = normalize_vault_path(self.vault_root.to_string_lossy().as_ref(), &raw_path);

        // Deny-list supremacy (§8 property 3): checked before trust level.
        if self.deny.is_denied(&relative) {
            warn!(tool = tool_name, path = %relative, "denied by deny list");
            return PermissionDecision::Deny {
                message: format!("access denied: {relative} matches a security pattern"),
            };
        }

        if trust_level == TrustLevel::Sandboxed {
            return PermissionDecision::Deny {
                message: format!("sandboxed agents cannot use host tool: {tool_name}"),
            };
        }
        if trust_level == TrustLevel::Direct {
            return PermissionDecision::Allow { updated_input: input };
        }

        let matches_existing = {
            let perms = self.permissions.read().unwrap();
            let globs = match kind {
                PermKind::Read => &perms.read,
                PermKind::Write => &perms.write,
            };
            glob_match_any(globs, &relative) || glob_match_any(&perms.allowed_paths, &relative)
        };
        if matches_existing {
            return PermissionDecision::Allow { updated_input: input };
        }

        self.request_approval(tool_name, input, tool_use_id, Some(relative), kind)
            .await
    }

    async fn check_bash_permission(
        &self,
        input: Value,
        tool_use_id: &str,
        trust_level: TrustLevel,
    ) -> PermissionDecision {
        let command = input.get("command").and_then(|v| v.as_str()).unwrap_or("");

        // Dangerous commands are rejected regardless of trust level (§4.2).
        if let Some(reason) = dangerous_command_reason(command) {
            warn!(%command, reason, "bash denied as dangerous");
            return PermissionDecision::Deny { message: reason.to_string() };
        }

        if trust_level == TrustLevel::Sandboxed {
            return PermissionDecision::Deny {
                message: "sandboxed agents cannot use host tool: Bash".to_string(),
            };
        }
        if trust_level == TrustLevel::Direct {
            return PermissionDecision::Allow { updated_input: input };
        }

        let allowed = {
            let perms = self.permissions.read().unwrap();
            perms.bash.allows(command)
        };
        if allowed {
            return PermissionDecision::Allow { updated_input: input };
        }

        self.request_approval("Bash", input, tool_use_id, Some(command.to_string()), PermKind::Write)
            .await
    }

    async fn request_approval(
        &self,
        tool_name: &str,
        input: Value,
        tool_use_id: &str,
        file_path: Option<String>,
        kind: PermKind,
    ) -> PermissionDecision {
        if self.pending.lock().unwrap().len() >= self.max_pending {
            warn!("too many pending permission requests for session {}", self.session_id);
            return PermissionDecision::Deny {
                message: "server overloaded with permission requests".to_string(),
            };
        }

        let request_id = format!("{}-{}", self.session_id, tool_use_id);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(
            request_id.clone(),
            PendingApproval { created_at: Instant::now(), resolver: tx },
        );

        let suggestions = file_path.as_deref().map(suggest_grants).unwrap_or_default();
        let info = PermissionRequestInfo {
            id: request_id.clone(),
            session_id: self.session_id,
            tool_name: tool_name.to_string(),
            input: input.clone(),
            file_path: file_path.clone(),
            suggestions,
        };
        let _ = self.events.send(PermissionEvent::Request(info));
        info!(request_id = %request_id, tool = tool_name, "awaiting approval");

        let resolution = match tokio::time::timeout(self.approval_timeout, rx).await {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_)) | Err(_) => {
                warn!(request_id = %request_id, "permission request timed out or dropped");
                Resolution::Denied
            }
        };
        self.pending.lock().unwrap().remove(&request_id);

        match resolution {
            Resolution::Granted { pattern } => {
                if let Some(pattern) = pattern {
                    self.widen_permissions(kind, &pattern);
                }
                PermissionDecision::Allow { updated_input: input }
            }
            Resolution::Denied => PermissionDecision::Deny {
                message: format!("permission denied for {tool_name}"),
            },
        }
    }

    /// Monotone grants (§8 property 4): widening never removes an existing
    /// pattern, and only ever adds within the current turn.
    fn widen_permissions(&self, kind: PermKind, pattern: &str) {
        let mut perms = self.permissions.write().unwrap();
        let target = match kind {
            PermKind::Read => &mut perms.read,
            PermKind::Write => &mut perms.write,
        };
        if !target.iter().any(|p| p == pattern) {
            target.push(pattern.to_string());
        }
    }

    /// Grants a pending request by ID. A pattern widens the session's
    /// read/write set for the remainder of the turn. Idempotent: a second
    /// call against an already-resolved ID is a no-op.
    pub fn grant(&self, request_id: &str, pattern: Option<String>) -> bool {
        let Some(pending) = self.pending.lock().unwrap().remove(request_id) else {
            return false;
        };
        let _ = pending.resolver.send(Resolution::Granted { pattern });
        true
    }

    pub fn deny(&self, request_id: &str) -> bool {
        let Some(pending) = self.pending.lock().unwrap().remove(request_id) else {
            return false;
        };
        let _ = pending.resolver.send(Resolution::Denied);
        true
    }

    /// Distinct interactive round-trip for `AskUserQuestion` (§4.2). Callers
    /// provide the `tool_use_id` stashed by the orchestrator when it saw the
    /// tool_use block in the assistant message, so the request ID it
    /// surfaces on the stream matches what `answer` is later called with.
    pub async fn ask_user_question(
        &self,
        tool_use_id: &str,
        questions: Vec<QuestionSpec>,
    ) -> HashMap<String, Value> {
        let request_id = format!("{}-q-{}", self.session_id, tool_use_id);
        let (tx, rx) = oneshot::channel();
        self.pending_questions.lock().unwrap().insert(
            request_id.clone(),
            PendingQuestion { created_at: Instant::now(), resolver: tx },
        );

        let info = UserQuestionInfo {
            id: request_id.clone(),
            session_id: self.session_id,
            tool_use_id: tool_use_id.to_string(),
            questions,
        };
        let _ = self.events.send(PermissionEvent::Question(info));

        let answers = match tokio::time::timeout(self.question_timeout, rx).await {
            Ok(Ok(answers)) => answers,
            Ok(Err(_)) | Err(_) => {
                warn!(request_id = %request_id, "ask_user_question timed out");
                HashMap::new()
            }
        };
        self.pending_questions.lock().unwrap().remove(&request_id);
        answers
    }

    pub fn answer_question(&self, request_id: &str, answers: HashMap<String, Value>) -> bool {
        let Some(pending) = self.pending_questions.lock().unwrap().remove(request_id) else {
            return false;
        };
        let _ = pending.resolver.send(answers);
        true
    }

    /// §9 "Cyclic structures": called when a turn/session ends. Force-
    /// resolves every outstanding future so no task is left awaiting a
    /// decision that will never arrive.
    pub fn force_resolve_all(&self) {
        let mut pending = self.pending.lock().unwrap();
        let count = pending.len();
        for (_, approval) in pending.drain() {
            let _ = approval.resolver.send(Resolution::Denied);
        }
        let mut questions = self.pending_questions.lock().unwrap();
        let qcount = questions.len();
        for (_, question) in questions.drain() {
            let _ = question.resolver.send(HashMap::new());
        }
        if count > 0 || qcount > 0 {
            warn!(
                session_id = %self.session_id,
                approvals = count,
                questions = qcount,
                "force-resolved pending permission state on turn end"
            );
        }
    }

    /// Periodic sweep for requests that have outlived `max_age` without a
    /// response (mirrors the Python original's `cleanup_stale`).
    pub fn cleanup_stale(&self, max_age: Duration) -> usize {
        let mut cleaned = 0;
        let mut pending = self.pending.lock().unwrap();
        let stale: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.created_at.elapsed() > max_age)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(p) = pending.remove(&id) {
                let _ = p.resolver.send(Resolution::Denied);
                cleaned += 1;
            }
        }
        drop(pending);

        let mut questions = self.pending_questions.lock().unwrap();
        let stale: Vec<String> = questions
            .iter()
            .filter(|(_, q)| q.created_at.elapsed() > max_age)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(q) = questions.remove(&id) {
                let _ = q.resolver.send(HashMap::new());
                cleaned += 1;
            }
        }
        cleaned
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

fn glob_match_any(patterns: &[String], path: &str) -> bool {
    patterns.iter().any(|pattern| {
        globset::Glob::new(pattern)
            .map(|g| g.compile_matcher().is_match(path))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parachute_session::TrustLevel;
    use serde_json::json;

    fn handler(trust: TrustLevel) -> (PermissionHandler, tokio::sync::mpsc::UnboundedReceiver<PermissionEvent>) {
        let mut perms = SessionPermissions::default();
        perms.trust_level = trust;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handler = PermissionHandler::new(
            Uuid::new_v4(),
            PathBuf::from("/vault"),
            perms,
            DenyMatcher::default(),
            tx,
        );
        (handler, rx)
    }

    #[tokio::test]
    async fn deny_list_wins_even_in_direct_trust() {
        let (handler, _rx) = handler(TrustLevel::Direct);
        let decision = handler
            .check_tool("Read", json!({"file_path": "/vault/.env"}), "t1")
            .await;
        assert!(matches!(decision, PermissionDecision::Deny { .. }));
    }

    #[tokio::test]
    async fn sandboxed_denies_host_tools_but_allows_mcp() {
        let (handler, _rx) = handler(TrustLevel::Sandboxed);
        let denied = handler
            .check_tool("Read", json!({"file_path": "Blogs/post.md"}), "t1")
            .await;
        assert!(matches!(denied, PermissionDecision::Deny { .. }));

        let allowed = handler
            .check_tool("mcp__vault__read", json!({}), "t2")
            .await;
        assert!(matches!(allowed, PermissionDecision::Allow { .. }));
    }

    #[tokio::test]
    async fn direct_trust_allows_everything_not_on_deny_list() {
        let (handler, _rx) = handler(TrustLevel::Direct);
        let decision = handler
            .check_tool("Write", json!({"file_path": "Blogs/post.md"}), "t1")
            .await;
        assert!(matches!(decision, PermissionDecision::Allow { .. }));
    }

    #[tokio::test]
    async fn direct_trust_still_blocks_dangerous_bash() {
        let (handler, _rx) = handler(TrustLevel::Direct);
        let decision = handler
            .check_tool("Bash", json!({"command": "sudo rm -rf /"}), "t1")
            .await;
        assert!(matches!(decision, PermissionDecision::Deny { .. }));
    }

    #[tokio::test]
    async fn vault_trust_matches_existing_grants_without_prompting() {
        let (handler, _rx) = handler(TrustLevel::Vault);
        handler.widen_permissions(PermKind::Write, "Blogs/**/*");
        let decision = handler
            .check_tool("Write", json!({"file_path": "Blogs/post.md"}), "t1")
            .await;
        assert!(matches!(decision, PermissionDecision::Allow { .. }));
    }

    #[tokio::test]
    async fn unresolved_approval_times_out_and_denies() {
        let (handler, mut rx) = handler(TrustLevel::Vault);
        let handler = std::sync::Arc::new(handler.with_timeouts(
            Duration::from_millis(20),
            Duration::from_millis(20),
        ));
        let hc = handler.clone();
        let task = tokio::spawn(async move {
            hc.check_tool("Write", json!({"file_path": "Blogs/post.md"}), "t1").await
        });
        // drain the event so the channel doesn't back up, but never resolve
        let _ = rx.recv().await;
        let decision = task.await.unwrap();
        assert!(matches!(decision, PermissionDecision::Deny { .. }));
        assert_eq!(handler.pending_count(), 0);
    }

    #[tokio::test]
    async fn grant_with_pattern_widens_permissions_monotonically() {
        let (handler, mut rx) = handler(TrustLevel::Vault);
        let handler = std::sync::Arc::new(handler);
        let hc = handler.clone();
        let task = tokio::spawn(async move {
            hc.check_tool("Write", json!({"file_path": "Blogs/post.md"}), "t1").await
        });
        let event = rx.recv().await.unwrap();
        let request_id = match event {
            PermissionEvent::Request(info) => info.id,
            _ => panic!("expected request event"),
        };
        assert!(handler.grant(&request_id, Some("Blogs/**/*".to_string())));
        let decision = task.await.unwrap();
        assert!(matches!(decision, PermissionDecision::Allow { .. }));
        assert!(handler.permissions().write.iter().any(|p| p == "Blogs/**/*"));

        // second grant on the same (now resolved) ID is a no-op
        assert!(!handler.grant(&request_id, None));
    }

    #[tokio::test]
    async fn force_resolve_all_denies_outstanding_requests() {
        let (handler, mut rx) = handler(TrustLevel::Vault);
        let handler = std::sync::Arc::new(handler);
        let hc = handler.clone();
        let task = tokio::spawn(async move {
            hc.check_tool("Write", json!({"file_path": "Blogs/post.md"}), "t1").await
        });
        let _ = rx.recv().await;
        handler.force_resolve_all();
        let decision = task.await.unwrap();
        assert!(matches!(decision, PermissionDecision::Deny { .. }));
    }
}
