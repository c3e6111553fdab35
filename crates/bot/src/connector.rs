//! C9 Bot Connector: the platform-agnostic supervisor described in §4.5 —
//! state machine, full-jitter reconnect, per-chat serialization, pairing,
//! group history, and response-mode routing — generic over a concrete
//! [`Platform`] transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::json;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use parachute_agent_runtime::AgentEvent;
use parachute_orchestrator::{Orchestrator, RecoveryMode, TurnRequest};
use parachute_session::{ChatType, LinkedBotChat, PairingRequest, Session, SessionSource, SessionStore, TrustLevel};

use crate::backoff::{full_jitter_delay, MAX_CONSECUTIVE_FAILURES};
use crate::error::BotError;
use crate::health::{sanitize_error, ConnectorHealth};
use crate::history::{format_for_prompt, GroupHistoryBuffer, GroupMessage};
use crate::platform::{ErrorClass, InboundMessage, Platform};
use crate::split::split_response;
use crate::state::ConnectorState;

/// Per the Open Question resolution (DESIGN.md): `all_messages` vs
/// `mention_only` is evaluated once, here, before the per-chat lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionMode {
    AllMessages,
    MentionOnly,
}

pub struct ConnectorConfig {
    pub allowed_users: Vec<String>,
    pub dm_trust_level: TrustLevel,
    pub group_trust_level: TrustLevel,
    pub mention_mode: MentionMode,
}

pub struct Connector<P: Platform> {
    platform_name: &'static str,
    platform: Mutex<P>,
    config: ConnectorConfig,
    sessions: Arc<SessionStore>,
    orchestrator: Arc<Orchestrator>,

    state: Mutex<ConnectorState>,
    failure_count: AtomicU64,
    last_error: Mutex<Option<(String, DateTime<Utc>)>>,
    started_at: Mutex<Option<Instant>>,
    last_message_time: Mutex<Option<DateTime<Utc>>>,
    reconnect_attempts: AtomicU32,

    chat_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    trust_overrides: Mutex<HashMap<String, TrustLevel>>,
    pending_pairings: Mutex<HashMap<String, Uuid>>,
    group_history: Mutex<GroupHistoryBuffer>,

    stop_notify: Notify,
    stop_requested: AtomicBool,
}

impl<P: Platform + 'static> Connector<P> {
    pub fn new(
        platform: P,
        config: ConnectorConfig,
        sessions: Arc<SessionStore>,
        orchestrator: Arc<Orchestrator>,
    ) -> Arc<Self> {
        let platform_name = platform.name();
        Arc::new(Self {
            platform_name,
            platform: Mutex::new(platform),
            config,
            sessions,
            orchestrator,
            state: Mutex::new(ConnectorState::Stopped),
            failure_count: AtomicU64::new(0),
            last_error: Mutex::new(None),
            started_at: Mutex::new(None),
            last_message_time: Mutex::new(None),
            reconnect_attempts: AtomicU32::new(0),
            chat_locks: Mutex::new(HashMap::new()),
            trust_overrides: Mutex::new(HashMap::new()),
            pending_pairings: Mutex::new(HashMap::new()),
            group_history: Mutex::new(GroupHistoryBuffer::new(
                crate::history::DEFAULT_MAX_MESSAGES_PER_CHAT,
                crate::history::DEFAULT_MAX_CHATS,
            )),
            stop_notify: Notify::new(),
            stop_requested: AtomicBool::new(false),
        })
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    async fn set_state(&self, next: ConnectorState) {
        let mut state = self.state.lock().await;
        if state.can_transition_to(next) {
            *state = next;
        } else {
            warn!(platform = self.platform_name, from = ?*state, to = ?next, "invalid connector state transition");
        }
    }

    pub async fn health(&self) -> ConnectorHealth {
        let state = *self.state.lock().await;
        let last_error = self.last_error.lock().await.clone();
        let uptime_secs = if state == ConnectorState::Running {
            self.started_at.lock().await.map(|t| t.elapsed().as_secs())
        } else {
            None
        };
        ConnectorHealth {
            platform: self.platform_name.to_string(),
            state,
            failure_count: self.failure_count.load(Ordering::Relaxed),
            last_error: last_error.as_ref().map(|(msg, _)| msg.clone()),
            last_error_time: last_error.map(|(_, t)| t),
            uptime_secs,
            last_message_time: *self.last_message_time.lock().await,
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            allowed_users_count: self.config.allowed_users.len(),
        }
    }

    /// §4.5 "Reconnect policy": runs the connector until `request_stop` is
    /// called or 10 consecutive failures push it to `Failed`.
    #[instrument(skip(self), fields(platform = self.platform_name))]
    pub async fn run(self: Arc<Self>) {
        let mut consecutive_failures: u32 = 0;

        'outer: while !self.stop_requested.load(Ordering::SeqCst) {
            self.set_state(ConnectorState::Running).await;
            *self.started_at.lock().await = Some(Instant::now());

            loop {
                if self.stop_requested.load(Ordering::SeqCst) {
                    break 'outer;
                }

                let receive = {
                    let mut platform = self.platform.lock().await;
                    platform.receive()
                };
                let outcome = tokio::select! {
                    result = receive => result,
                    _ = self.stop_notify.notified() => break 'outer,
                };

                match outcome {
                    Ok(messages) => {
                        if consecutive_failures > 0 {
                            info!(platform = self.platform_name, attempts = consecutive_failures, "connector recovered");
                            consecutive_failures = 0;
                            self.reconnect_attempts.store(0, Ordering::Relaxed);
                        }
                        for message in messages {
                            *self.last_message_time.lock().await = Some(Utc::now());
                            let connector = self.clone();
                            tokio::spawn(async move { connector.dispatch(message).await });
                        }
                    }
                    Err(err) => {
                        consecutive_failures += 1;
                        self.failure_count.fetch_add(1, Ordering::Relaxed);
                        self.reconnect_attempts.store(consecutive_failures, Ordering::Relaxed);
                        let sanitized = sanitize_error(error_type_name(&err), &err.to_string());
                        *self.last_error.lock().await = Some((sanitized.clone(), Utc::now()));

                        let platform_guard = self.platform.lock().await;
                        let class = platform_guard.classify_error(&err);
                        drop(platform_guard);

                        if class == ErrorClass::Auth {
                            warn!(platform = self.platform_name, error = %sanitized, "fatal auth error, not retrying");
                            self.set_state(ConnectorState::Failed).await;
                            return;
                        }

                        warn!(platform = self.platform_name, attempt = consecutive_failures, error = %sanitized, "connector error");
                        self.set_state(ConnectorState::Reconnecting).await;

                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            break;
                        }

                        let delay = full_jitter_delay(consecutive_failures);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.stop_notify.notified() => break 'outer,
                        }
                        continue;
                    }
                }
            }

            if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                warn!(platform = self.platform_name, "connector failed after max consecutive failures");
                self.set_state(ConnectorState::Failed).await;
                return;
            }
        }

        self.set_state(ConnectorState::Stopped).await;
    }

    fn is_user_allowed(&self, user_id: &str) -> bool {
        self.config.allowed_users.iter().any(|u| u == user_id)
    }

    fn source(&self) -> SessionSource {
        match self.platform_name {
            "telegram" => SessionSource::Telegram,
            "discord" => SessionSource::Discord,
            "matrix" => SessionSource::Matrix,
            _ => SessionSource::Web,
        }
    }

    async fn chat_lock(&self, chat_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.chat_locks.lock().await;
        locks.entry(chat_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Looks up a cached trust override for `user_id`, falling back to the
    /// chat-type default.
    async fn trust_level_for(&self, chat_type: ChatType, user_id: &str) -> TrustLevel {
        if let Some(level) = self.trust_overrides.lock().await.get(user_id).copied() {
            return level;
        }
        match chat_type {
            ChatType::Dm => self.config.dm_trust_level,
            ChatType::Group => self.config.group_trust_level,
        }
    }

    /// Called when an operator approves a pairing request, so future
    /// lookups for this user skip the pending-request check.
    pub async fn update_trust_override(&self, user_id: &str, level: TrustLevel) {
        self.trust_overrides.lock().await.insert(user_id.to_string(), level);
    }

    async fn dispatch(self: Arc<Self>, message: InboundMessage) {
        if message.chat_type == ChatType::Group {
            let mut history = self.group_history.lock().await;
            history.record(
                &message.chat_id,
                GroupMessage {
                    user_display: message.user_display.clone(),
                    text: message.text.clone(),
                    timestamp: Utc::now(),
                    message_id: message.message_id.clone(),
                },
            );
        }

        if !self.should_respond(&message) {
            return;
        }

        let lock = self.chat_lock(&message.chat_id).await;
        let _guard = lock.lock().await;

        if let Err(err) = self.handle_triggered_message(&message).await {
            warn!(platform = self.platform_name, chat_id = %message.chat_id, error = %err, "failed to handle message");
        }
    }

    fn should_respond(&self, message: &InboundMessage) -> bool {
        match message.chat_type {
            ChatType::Dm => true,
            ChatType::Group => self.config.mention_mode == MentionMode::AllMessages || message.mentions_bot,
        }
    }

    async fn handle_triggered_message(&self, message: &InboundMessage) -> Result<(), BotError> {
        if !self.is_user_allowed(&message.user_id) {
            let reply = self.handle_unknown_user(message).await?;
            self.send_reply(&message.chat_id, &reply).await?;
            return Ok(());
        }

        let session = self.get_or_create_session(message).await?;
        if is_pending_initialization(&session) {
            self.send_reply(&message.chat_id, "Still waiting for the owner to finish setting up this chat.").await?;
            return Ok(());
        }

        let mut prompt = message.text.clone();
        if message.chat_type == ChatType::Group {
            let context = {
                let history = self.group_history.lock().await;
                let recent = history.recent(&message.chat_id, Some(&message.message_id));
                format_for_prompt(&recent)
            };
            if !context.is_empty() {
                prompt = format!("{context}\n\n{}", message.text);
            }
        }

        self.run_and_reply(&message.chat_id, session.id, prompt).await
    }

    /// §4.5 "Pairing": a first message from an unknown user doesn't start a
    /// turn. A Pairing Request and a linked pending session are created
    /// instead, and a canned reply is returned for the caller to send.
    async fn handle_unknown_user(&self, message: &InboundMessage) -> Result<String, BotError> {
        let mut pending = self.pending_pairings.lock().await;
        if let Some(request_id) = pending.get(&message.user_id) {
            if let Ok(request) = self.sessions.get_pairing_request(*request_id) {
                if request.status == parachute_session::PairingStatus::Pending {
                    return Ok("Your request is still pending. The owner will approve it shortly.".to_string());
                }
            }
        }

        let request = PairingRequest::new(
            self.platform_name,
            &message.user_id,
            Some(message.user_display.clone()),
            &message.chat_id,
        );
        self.sessions.insert_pairing_request(&request).map_err(anyhow::Error::from)?;
        pending.insert(message.user_id.clone(), request.id);
        drop(pending);

        let trust_level = self.trust_level_for(message.chat_type, &message.user_id).await;
        let mut session = Session::new(self.source(), "chat");
        session.title = Some(format!("{} ({})", message.user_display, self.platform_name));
        session.linked_bot = Some(LinkedBotChat {
            platform: self.platform_name.to_string(),
            chat_id: message.chat_id.clone(),
            chat_type: message.chat_type,
        });
        let mut permissions = session.permissions();
        permissions.trust_level = trust_level;
        session.set_permissions(&permissions);
        session.metadata.insert("pending_approval".to_string(), json!(true));
        session.metadata.insert("pairing_request_id".to_string(), json!(request.id));
        self.sessions.insert(&session).map_err(anyhow::Error::from)?;

        info!(platform = self.platform_name, request_id = %request.id, "created pairing request");
        Ok("Hi! I need approval before we can chat. Your request has been sent to the owner.".to_string())
    }

    /// §4.5: find the session linked to this bot chat, or create one with
    /// `pending_initialization` set for a not-yet-configured user.
    async fn get_or_create_session(&self, message: &InboundMessage) -> Result<Session, BotError> {
        if let Some(session) = self.sessions.find_by_bot_chat(self.platform_name, &message.chat_id).map_err(anyhow::Error::from)? {
            return Ok(session);
        }

        let trust_level = self.trust_level_for(message.chat_type, &message.user_id).await;
        let mut session = Session::new(self.source(), "chat");
        session.title = Some(format!("{} - {}", self.platform_name, message.user_display));
        session.linked_bot = Some(LinkedBotChat {
            platform: self.platform_name.to_string(),
            chat_id: message.chat_id.clone(),
            chat_type: message.chat_type,
        });
        let mut permissions = session.permissions();
        permissions.trust_level = trust_level;
        session.set_permissions(&permissions);
        session.metadata.insert("pending_initialization".to_string(), json!(true));
        self.sessions.insert(&session).map_err(anyhow::Error::from)?;
        info!(platform = self.platform_name, session_id = %session.id, chat_id = %message.chat_id, "created bot session");
        Ok(session)
    }

    async fn run_and_reply(&self, chat_id: &str, session_id: Uuid, prompt: String) -> Result<(), BotError> {
        let request = TurnRequest::new(prompt).with_session(Some(session_id));
        let mut request = request;
        request.recovery_mode = RecoveryMode::FreshSession;

        let handle = self.orchestrator.run_turn(request, self.source()).await.map_err(anyhow::Error::from)?;
        let mut events = handle.events;
        let mut text = String::new();
        let mut failure: Option<String> = None;

        while let Some(event) = events.next().await {
            match event {
                AgentEvent::Text { delta } => text.push_str(&delta),
                AgentEvent::Error { message } => failure = Some(message),
                AgentEvent::PermissionRequest(_) | AgentEvent::UserQuestion(_) => {
                    debug!(chat_id, "permission/question event pending operator resolution via the HTTP surface");
                }
                _ => {}
            }
        }

        let reply = match failure {
            Some(message) => format!("Something went wrong: {message}"),
            None if text.is_empty() => "(no response)".to_string(),
            None => text,
        };
        self.send_reply(chat_id, &reply).await
    }

    async fn send_reply(&self, chat_id: &str, text: &str) -> Result<(), BotError> {
        let platform = self.platform.lock().await;
        let max_len = platform.max_message_len();
        for chunk in split_response(text, max_len) {
            platform.send(chat_id, &chunk).await?;
        }
        Ok(())
    }
}

fn is_pending_initialization(session: &Session) -> bool {
    session.metadata.get("pending_initialization").and_then(|v| v.as_bool()).unwrap_or(false)
}

fn error_type_name(err: &BotError) -> &'static str {
    match err {
        BotError::TransientNetwork(_) => "TransientNetwork",
        BotError::Auth(_) => "Auth",
        BotError::Other(_) => "Error",
    }
}
