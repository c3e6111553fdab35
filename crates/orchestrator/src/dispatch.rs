//! C6 Orchestrator: turn dispatch end to end (§4.4). Grounded structurally
//! on the teacher's `crates/runtime/src/runtime/chat.rs` (one streaming
//! entry point per turn, `tracing::instrument` spans, non-fatal `warn!` on
//! persistence failures) with entirely new session/permission/container
//! wiring in place of the teacher's memory-and-LLM pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use parachute_agent_runtime::{AgentEvent, AgentRuntime, InterruptHandle, TurnOptions};
use parachute_container::{AgentSandboxConfig, CapabilityPaths, ContainerEvent, ContainerManager};
use parachute_permission::{PermissionHandler, PermissionRegistry};
use parachute_session::{Session, SessionSource, SessionStore, TrustLevel};

use crate::curator::TitleCurator;
use crate::error::{OrchestratorError, Result};
use crate::gate::PermissionGate;
use crate::request::{RecoveryMode, TurnRequest};

pub struct OrchestratorConfig {
    pub vault_root: PathBuf,
    pub deny_extra_patterns: Vec<String>,
    pub container_enabled: bool,
    pub container_image: String,
    pub turn_deadline_secs: u64,
    pub ephemeral_memory_mb: u64,
    pub cpu_quota: f64,
}

pub struct Orchestrator {
    sessions: Arc<SessionStore>,
    containers: Arc<ContainerManager>,
    runtime: Arc<dyn AgentRuntime>,
    curator: Arc<dyn TitleCurator>,
    permissions: Arc<PermissionRegistry>,
    config: OrchestratorConfig,
}

pub struct TurnHandle {
    pub session_id: Uuid,
    pub events: Pin<Box<dyn Stream<Item = AgentEvent> + Send>>,
    pub interrupt: InterruptHandle,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        containers: Arc<ContainerManager>,
        runtime: Arc<dyn AgentRuntime>,
        curator: Arc<dyn TitleCurator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            sessions,
            containers,
            runtime,
            curator,
            permissions: Arc::new(PermissionRegistry::new()),
            config,
        }
    }

    /// Handle to the process-wide permission-request registry (§9 "Global
    /// state"). The HTTP layer holds this so its grant/deny/answer handlers
    /// can resolve a pending request by session ID without reaching into
    /// this orchestrator's internals.
    pub fn permission_registry(&self) -> Arc<PermissionRegistry> {
        self.permissions.clone()
    }

    pub fn sessions(&self) -> Arc<SessionStore> {
        self.sessions.clone()
    }

    #[instrument(skip(self, request), fields(session_id = ?request.session_id))]
    pub async fn run_turn(&self, request: TurnRequest, source: SessionSource) -> Result<TurnHandle> {
        let (mut session, notice) = self.resolve_session(&request, source).await?;
        let session_id = session.id;

        let permissions = session.permissions();
        let trust_level = permissions.trust_level;
        let deny = parachute_session::DenyMatcher::new(&self.config.deny_extra_patterns);

        let (perm_tx, perm_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(PermissionHandler::new(
            session_id,
            self.config.vault_root.clone(),
            permissions,
            deny,
            perm_tx,
        ));
        self.permissions.register(session_id, handler.clone()).await;

        let mut options = TurnOptions::new(request.message.clone());
        options.session_id = Some(session_id);
        options.system_prompt = request.system_prompt.clone();
        options.model = session.model.clone();
        options.working_directory = request.working_directory.clone();
        options.tool_gate = Some(Arc::new(PermissionGate(handler.clone())));

        let route_through_container = trust_level == TrustLevel::Sandboxed
            && self.config.container_enabled
            && self.containers.probe().await;

        let (agent_events, interrupt) = if route_through_container {
            self.start_container_turn(&session, &request).await?
        } else {
            if trust_level == TrustLevel::Sandboxed && self.config.container_enabled {
                warn!(%session_id, "container runtime unavailable; falling back to direct execution");
            }
            let running = self.runtime.start_turn(options).await?;
            (running.events, running.interrupt)
        };

        let permission_events = tokio_stream_from_unbounded(perm_rx).map(permission_event_to_agent_event);
        let merged = futures::stream::select(agent_events, permission_events);

        let (out_tx, out_rx) = mpsc::channel(256);
        if let Some(notice) = notice {
            let _ = out_tx.send(AgentEvent::Session { session_id, notice: Some(notice) }).await;
        } else {
            let _ = out_tx.send(AgentEvent::Session { session_id, notice: None }).await;
        }
        // `message_count` is bumped once per turn, in `drive_turn` at turn
        // end (§8 scenario 1); this persist only saves the new session /
        // resolved-notice before the turn's own events start flowing.
        if let Err(e) = self.sessions.insert(&session) {
            warn!(%session_id, error = %e, "failed to persist new session at turn start");
        }

        let sessions = self.sessions.clone();
        let curator = self.curator.clone();
        let handler_for_task = handler.clone();
        let permissions = self.permissions.clone();
        tokio::spawn(async move {
            drive_turn(merged, out_tx, sessions, curator, handler_for_task, session_id).await;
            permissions.unregister(session_id).await;
        });

        Ok(TurnHandle {
            session_id,
            events: Box::pin(tokio_stream::wrappers::ReceiverStream::new(out_rx)),
            interrupt,
        })
    }

    async fn resolve_session(&self, request: &TurnRequest, source: SessionSource) -> Result<(Session, Option<String>)> {
        match request.session_id {
            Some(id) => match self.sessions.try_get(id)? {
                Some(session) => Ok((session, None)),
                None => match request.recovery_mode {
                    RecoveryMode::FreshSession => {
                        let session = self.new_session(&request.module, source);
                        Ok((session, Some(format!("session_unavailable: {id} not found, started a new session"))))
                    }
                    RecoveryMode::ContextSummary => {
                        let session = self.new_session(&request.module, source);
                        Ok((session, None))
                    }
                },
            },
            None => Ok((self.new_session(&request.module, source), None)),
        }
    }

    fn new_session(&self, module: &str, source: SessionSource) -> Session {
        let mut session = Session::new(source, module);
        session.working_directory = Some(self.config.vault_root.to_string_lossy().to_string());
        session
    }

    async fn start_container_turn(
        &self,
        session: &Session,
        request: &TurnRequest,
    ) -> Result<(Pin<Box<dyn Stream<Item = AgentEvent> + Send>>, InterruptHandle)> {
        let permissions = session.permissions();
        let credentials = parachute_container::resolve_credentials(Some(session.source), BTreeMap::new());
        let cfg = AgentSandboxConfig {
            session_id: session.id,
            vault_root: self.config.vault_root.clone(),
            allowed_paths: permissions.allowed_paths.clone(),
            network_enabled: false,
            memory_mb: self.config.ephemeral_memory_mb,
            cpu_quota: self.config.cpu_quota,
            image: self.config.container_image.clone(),
            turn_deadline_secs: self.config.turn_deadline_secs,
            capabilities: CapabilityPaths {
                mcp_config: None,
                skills_dir: None,
                custom_agents_dir: None,
                context_file: None,
                plugin_dirs: vec![],
            },
            env_slug: None,
            resume_token: session.resume.as_ref().map(|r| r.runtime_token.clone()),
            credentials,
            system_prompt: request.system_prompt.clone(),
        };

        let payload = serde_json::to_vec(&parachute_container::EntrypointPayload {
            message: request.message.clone(),
            resume_token: cfg.resume_token.clone(),
            credentials: cfg.credentials.clone(),
            capability_manifest: serde_json::json!({}),
        })
        .unwrap_or_default();

        let container_events = self.containers.run_agent(&cfg, payload).await?;
        let interrupt = InterruptHandle::new();
        let events = container_events.filter_map(|event| async move {
            match event {
                Ok(ContainerEvent::Line(value)) => serde_json::from_value::<AgentEvent>(value).ok(),
                Ok(ContainerEvent::Exited { code }) if parachute_container::is_oom_exit(code) => {
                    Some(AgentEvent::Error { message: "the sandbox ran out of memory and was restarted".to_string() })
                }
                Ok(ContainerEvent::Exited { .. }) => None,
                Err(e) => Some(AgentEvent::Error { message: e.to_string() }),
            }
        });
        Ok((Box::pin(events), interrupt))
    }
}

async fn drive_turn(
    mut merged: impl Stream<Item = AgentEvent> + Unpin,
    out_tx: mpsc::Sender<AgentEvent>,
    sessions: Arc<SessionStore>,
    curator: Arc<dyn TitleCurator>,
    handler: Arc<PermissionHandler>,
    session_id: Uuid,
) {
    let mut tool_use_count: u64 = 0;
    let mut accumulated_text = String::new();

    while let Some(event) = merged.next().await {
        match &event {
            AgentEvent::ToolUse(_) => tool_use_count += 1,
            AgentEvent::Text { delta } => accumulated_text.push_str(delta),
            _ => {}
        }
        let terminal = event.is_terminal();
        if out_tx.send(event).await.is_err() {
            break;
        }
        if terminal {
            break;
        }
    }

    handler.force_resolve_all();
    info!(%session_id, tool_use_count, "turn finished");

    match sessions.try_get(session_id) {
        Ok(Some(mut session)) => {
            session.set_permissions(&handler.permissions());
            session.touch();
            if !accumulated_text.is_empty() {
                if let Some(title) = curator.suggest_title(&accumulated_text).await {
                    session.title = Some(title);
                    session.title_source = Some(parachute_session::TitleSource::Ai);
                }
            }
            if let Err(e) = sessions.insert(&session) {
                warn!(%session_id, error = %e, "failed to persist session mutations at turn end");
            }
        }
        Ok(None) => warn!(%session_id, "session vanished before turn end could persist"),
        Err(e) => warn!(%session_id, error = %e, "failed to reload session at turn end"),
    }
}

fn tokio_stream_from_unbounded<T>(rx: mpsc::UnboundedReceiver<T>) -> impl Stream<Item = T> {
    tokio_stream::wrappers::UnboundedReceiverStream::new(rx)
}

fn permission_event_to_agent_event(event: parachute_permission::PermissionEvent) -> AgentEvent {
    match event {
        parachute_permission::PermissionEvent::Request(info) => {
            AgentEvent::PermissionRequest(parachute_agent_runtime::PermissionRequestPayload {
                request_id: info.id,
                session_id: info.session_id,
                tool_name: info.tool_name,
                input: info.input,
                file_path: info.file_path,
                suggestions: info
                    .suggestions
                    .into_iter()
                    .map(|s| parachute_agent_runtime::GrantSuggestionPayload {
                        scope: s.scope.to_string(),
                        pattern: s.pattern,
                        label: s.label,
                    })
                    .collect(),
            })
        }
        parachute_permission::PermissionEvent::Question(info) => {
            AgentEvent::UserQuestion(parachute_agent_runtime::UserQuestionPayload {
                request_id: info.id,
                session_id: info.session_id,
                tool_use_id: info.tool_use_id,
                questions: info
                    .questions
                    .into_iter()
                    .map(|q| parachute_agent_runtime::QuestionPayload { question: q.question, choices: q.choices })
                    .collect(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parachute_agent_runtime::FakeAgentRuntime;
    use parachute_container::ContainerManager;
    use crate::curator::NoOpCurator;

    struct StubCurator(Option<String>);

    #[async_trait]
    impl TitleCurator for StubCurator {
        async fn suggest_title(&self, _turn_text: &str) -> Option<String> {
            self.0.clone()
        }
    }

    fn test_config(vault_root: PathBuf) -> OrchestratorConfig {
        OrchestratorConfig {
            vault_root,
            deny_extra_patterns: vec![],
            container_enabled: false,
            container_image: "parachute-sandbox:latest".to_string(),
            turn_deadline_secs: 300,
            ephemeral_memory_mb: 512,
            cpu_quota: 1.0,
        }
    }

    fn build(
        dir: &tempfile::TempDir,
        runtime: Arc<dyn AgentRuntime>,
        curator: Arc<dyn TitleCurator>,
    ) -> Orchestrator {
        let sessions = Arc::new(SessionStore::open(dir.path().join("sessions.redb"), 16).unwrap());
        let containers = Arc::new(ContainerManager::new(dir.path().join("vault")));
        Orchestrator::new(sessions, containers, runtime, curator, test_config(dir.path().join("vault")))
    }

    #[tokio::test]
    async fn fresh_session_is_created_when_no_session_id_given() {
        let dir = tempfile::tempdir().unwrap();
        let runtime: Arc<dyn AgentRuntime> = Arc::new(FakeAgentRuntime::happy_path(Uuid::new_v4()));
        let orchestrator = build(&dir, runtime, Arc::new(NoOpCurator));

        let handle = orchestrator.run_turn(TurnRequest::new("hello"), SessionSource::Web).await.unwrap();
        let events: Vec<AgentEvent> = handle.events.collect().await;

        match &events[0] {
            AgentEvent::Session { session_id, notice } => {
                assert_eq!(*session_id, handle.session_id);
                assert!(notice.is_none());
            }
            other => panic!("expected a leading session event, got {other:?}"),
        }
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn unknown_session_id_triggers_fresh_session_notice() {
        let dir = tempfile::tempdir().unwrap();
        let runtime: Arc<dyn AgentRuntime> = Arc::new(FakeAgentRuntime::happy_path(Uuid::new_v4()));
        let orchestrator = build(&dir, runtime, Arc::new(NoOpCurator));

        let missing = Uuid::new_v4();
        let request = TurnRequest::new("hello").with_session(Some(missing));
        let handle = orchestrator.run_turn(request, SessionSource::Web).await.unwrap();
        let events: Vec<AgentEvent> = handle.events.collect().await;

        match &events[0] {
            AgentEvent::Session { session_id, notice } => {
                assert_ne!(*session_id, missing, "a brand new session id must be minted");
                assert!(notice.as_deref().unwrap_or_default().contains("session_unavailable"));
            }
            other => panic!("expected a leading session event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminal_event_closes_the_stream_and_persists_session_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let session_id = Uuid::new_v4();
        let runtime: Arc<dyn AgentRuntime> = Arc::new(FakeAgentRuntime::happy_path(session_id));
        let sessions = Arc::new(SessionStore::open(dir.path().join("sessions.redb"), 16).unwrap());
        let containers = Arc::new(ContainerManager::new(dir.path().join("vault")));
        let orchestrator = Orchestrator::new(
            sessions.clone(),
            containers,
            runtime,
            Arc::new(StubCurator(Some("a suggested title".to_string()))),
            test_config(dir.path().join("vault")),
        );

        let handle = orchestrator.run_turn(TurnRequest::new("hello"), SessionSource::Web).await.unwrap();
        let real_session_id = handle.session_id;
        let events: Vec<AgentEvent> = handle.events.collect().await;
        // the turn-start notice, then the fake runtime's own session/text/done script.
        assert_eq!(events.len(), 4);
        assert!(events.last().unwrap().is_terminal());

        // drive_turn persists asynchronously after the terminal event is forwarded; give the
        // spawned task a beat to reach its tail before asserting on storage.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let stored = sessions.get(real_session_id).unwrap();
        assert_eq!(stored.title.as_deref(), Some("a suggested title"));
        assert_eq!(stored.message_count, 1, "a single turn must bump message_count exactly once");
    }
}
