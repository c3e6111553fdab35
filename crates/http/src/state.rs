//! C8 SSE Endpoint Layer: process-wide handles the request handlers share.

use std::sync::Arc;
use std::time::Instant;

use parachute_config::AppConfig;
use parachute_orchestrator::Orchestrator;
use parachute_permission::PermissionRegistry;
use parachute_session::SessionStore;
use parachute_stream::StreamManager;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<SessionStore>,
    pub streams: Arc<StreamManager>,
    pub permissions: Arc<PermissionRegistry>,
    pub config: Arc<AppConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        streams: Arc<StreamManager>,
        config: Arc<AppConfig>,
    ) -> Self {
        let sessions = orchestrator.sessions();
        let permissions = orchestrator.permission_registry();
        Self {
            orchestrator,
            sessions,
            streams,
            permissions,
            config,
            started_at: Instant::now(),
        }
    }
}
