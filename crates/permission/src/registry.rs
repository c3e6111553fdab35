//! §9 "Global state": the permission-request maps are a process-wide
//! singleton with explicit lifecycle, encapsulated behind a handle the
//! server passes to request handlers rather than an ambient global.
//!
//! One [`PermissionHandler`] exists per in-flight turn (§4.2), but the HTTP
//! layer only knows a session ID when it receives a `grant`/`deny`/`answer`
//! call. This registry is the lookup the Orchestrator installs a handler
//! into at turn start and removes it from at turn end, so C8 never needs to
//! reach into C6's internals to resolve a pending request.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::handler::PermissionHandler;

#[derive(Default)]
pub struct PermissionRegistry {
    handlers: RwLock<HashMap<Uuid, Arc<PermissionHandler>>>,
}

impl PermissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the Orchestrator when a turn's handler is constructed.
    /// A second registration for the same session replaces the first,
    /// matching "one handler per in-flight turn" (a prior turn's handler,
    /// if still registered, is stale because its turn has since ended).
    pub async fn register(&self, session_id: Uuid, handler: Arc<PermissionHandler>) {
        self.handlers.write().await.insert(session_id, handler);
    }

    /// Called by the Orchestrator when a turn ends, after
    /// `force_resolve_all` has been invoked on the handler being removed.
    pub async fn unregister(&self, session_id: Uuid) {
        self.handlers.write().await.remove(&session_id);
    }

    pub async fn get(&self, session_id: Uuid) -> Option<Arc<PermissionHandler>> {
        self.handlers.read().await.get(&session_id).cloned()
    }

    /// `true` if `grant(request_id, pattern)` resolved a pending request on
    /// the handler registered for `session_id`; `false` if no handler is
    /// registered for the session or the request ID was already resolved.
    pub async fn grant(&self, session_id: Uuid, request_id: &str, pattern: Option<String>) -> bool {
        match self.get(session_id).await {
            Some(handler) => handler.grant(request_id, pattern),
            None => false,
        }
    }

    pub async fn deny(&self, session_id: Uuid, request_id: &str) -> bool {
        match self.get(session_id).await {
            Some(handler) => handler.deny(request_id),
            None => false,
        }
    }

    pub async fn answer(
        &self,
        session_id: Uuid,
        request_id: &str,
        answers: HashMap<String, serde_json::Value>,
    ) -> bool {
        match self.get(session_id).await {
            Some(handler) => handler.answer_question(request_id, answers),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requests::PermissionEvent;
    use std::path::PathBuf;
    use parachute_session::{DenyMatcher, SessionPermissions};

    fn handler() -> (Arc<PermissionHandler>, tokio::sync::mpsc::UnboundedReceiver<PermissionEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut permissions = SessionPermissions::default();
        // Direct trust allows Write outright (no approval event emitted); use
        // Vault trust so the check actually produces a pending request.
        permissions.trust_level = parachute_session::TrustLevel::Vault;
        let handler = Arc::new(PermissionHandler::new(
            Uuid::new_v4(),
            PathBuf::from("/vault"),
            permissions,
            DenyMatcher::default(),
            tx,
        ));
        (handler, rx)
    }

    #[tokio::test]
    async fn grant_routes_to_the_registered_handler_for_that_session() {
        let registry = PermissionRegistry::new();
        let session_id = Uuid::new_v4();
        let (handler, mut rx) = handler();
        registry.register(session_id, handler.clone()).await;

        let h = handler.clone();
        let task = tokio::spawn(async move {
            h.check_tool("Write", serde_json::json!({"file_path": "a.md"}), "t1").await
        });
        let event = rx.recv().await.unwrap();
        let request_id = match event {
            PermissionEvent::Request(info) => info.id,
            _ => panic!("expected request"),
        };

        assert!(registry.grant(session_id, &request_id, None).await);
        let _ = task.await;
    }

    #[tokio::test]
    async fn grant_for_unknown_session_is_false_not_a_panic() {
        let registry = PermissionRegistry::new();
        assert!(!registry.grant(Uuid::new_v4(), "whatever", None).await);
    }

    #[tokio::test]
    async fn unregister_removes_the_handler_from_lookup() {
        let registry = PermissionRegistry::new();
        let session_id = Uuid::new_v4();
        let (handler, _rx) = handler();
        registry.register(session_id, handler).await;
        assert!(registry.get(session_id).await.is_some());

        registry.unregister(session_id).await;
        assert!(registry.get(session_id).await.is_none());
    }
}
