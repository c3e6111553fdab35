use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use parachute_session::SessionSource;

use crate::mounts::CapabilityPaths;

/// §4.3 "Credential injection policy": bot-class and unknown session
/// sources always get an empty credentials map, regardless of any
/// configuration. Called at the single point where a turn's real
/// credentials would otherwise be attached, so the rule cannot be
/// accidentally bypassed by a caller constructing `AgentSandboxConfig`
/// directly with real credentials for a bot session.
pub fn resolve_credentials(
    source: Option<SessionSource>,
    real_credentials: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    match source {
        Some(SessionSource::Telegram) | Some(SessionSource::Discord) | Some(SessionSource::Matrix) | None => {
            BTreeMap::new()
        }
        Some(SessionSource::Web) | Some(SessionSource::Cli) => real_credentials,
    }
}

/// Container kind, used both for naming and for the `type` label (§6
/// "Container label schema").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Ephemeral,
    Session,
    NamedEnv,
}

impl ContainerKind {
    pub fn label(self) -> &'static str {
        match self {
            ContainerKind::Ephemeral => "ephemeral",
            ContainerKind::Session => "session",
            ContainerKind::NamedEnv => "named-env",
        }
    }
}

/// Per-turn configuration for a single `run_agent`/`run_session` call.
/// Grounded on the Python original's `AgentSandboxConfig`.
#[derive(Debug, Clone)]
pub struct AgentSandboxConfig {
    pub session_id: Uuid,
    pub vault_root: PathBuf,
    pub allowed_paths: Vec<String>,
    pub network_enabled: bool,
    pub memory_mb: u64,
    pub cpu_quota: f64,
    pub image: String,
    pub turn_deadline_secs: u64,
    pub capabilities: CapabilityPaths,
    pub env_slug: Option<String>,
    pub resume_token: Option<String>,
    /// Known non-bot callers get real credentials; bot/unknown sources
    /// always see an empty map (§4.3 "Credential injection policy" — a hard
    /// rule, never configuration-gated).
    pub credentials: BTreeMap<String, String>,
    pub system_prompt: Option<String>,
}

/// The JSON blob written to the entrypoint's stdin (§4.3 "Entrypoint
/// payload").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrypointPayload {
    pub message: String,
    pub resume_token: Option<String>,
    pub credentials: BTreeMap<String, String>,
    pub capability_manifest: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> BTreeMap<String, String> {
        BTreeMap::from([("llm_token".to_string(), "secret".to_string())])
    }

    #[test]
    fn bot_and_unknown_sources_never_receive_credentials() {
        assert!(resolve_credentials(Some(SessionSource::Telegram), creds()).is_empty());
        assert!(resolve_credentials(Some(SessionSource::Discord), creds()).is_empty());
        assert!(resolve_credentials(Some(SessionSource::Matrix), creds()).is_empty());
        assert!(resolve_credentials(None, creds()).is_empty());
    }

    #[test]
    fn known_non_bot_sources_keep_their_credentials() {
        assert_eq!(resolve_credentials(Some(SessionSource::Web), creds()), creds());
        assert_eq!(resolve_credentials(Some(SessionSource::Cli), creds()), creds());
    }
}
