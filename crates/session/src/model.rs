//! Session, permission, and pairing data model.
//!
//! Field names follow the vault-facing JSON shape (camelCase) rather than the
//! Rust convention, since the same struct round-trips through the HTTP API
//! and the on-disk session row.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Policy tag determining whether a turn runs directly or in a container,
/// and what tools are admissible. Ordered by increasing privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Docker container, scoped mounts, no network, no host bash.
    Sandboxed,
    /// Vault-relative filesystem only, no bash, no network, no container.
    Vault,
    /// Direct host execution, unrestricted except for the deny list.
    Direct,
}

impl Default for TrustLevel {
    fn default() -> Self {
        TrustLevel::Direct
    }
}

/// Bash command policy. Replaces the source model's `bash: list | bool`
/// union with an explicit three-state sum so every call site matches
/// uniformly instead of branching on a dynamic shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BashPolicyWire", into = "BashPolicyWire")]
pub enum BashPolicy {
    Unrestricted,
    List(Vec<String>),
    Denied,
}

impl Default for BashPolicy {
    fn default() -> Self {
        BashPolicy::List(vec!["ls".into(), "pwd".into(), "tree".into()])
    }
}

impl BashPolicy {
    /// `true` if `command`'s base word is admissible under this policy.
    /// Callers still must run the dangerous-pattern filter independently —
    /// this only checks the allow-list shape.
    pub fn allows(&self, command: &str) -> bool {
        match self {
            BashPolicy::Unrestricted => true,
            BashPolicy::Denied => false,
            BashPolicy::List(allowed) => {
                let base = command.trim().split_whitespace().next().unwrap_or("");
                allowed.iter().any(|c| c == base)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum BashPolicyWire {
    Flag(bool),
    List(Vec<String>),
}

impl From<BashPolicy> for BashPolicyWire {
    fn from(p: BashPolicy) -> Self {
        match p {
            BashPolicy::Unrestricted => BashPolicyWire::Flag(true),
            BashPolicy::Denied => BashPolicyWire::Flag(false),
            BashPolicy::List(l) => BashPolicyWire::List(l),
        }
    }
}

impl TryFrom<BashPolicyWire> for BashPolicy {
    type Error = std::convert::Infallible;

    fn try_from(wire: BashPolicyWire) -> Result<Self, Self::Error> {
        Ok(match wire {
            BashPolicyWire::Flag(true) => BashPolicy::Unrestricted,
            BashPolicyWire::Flag(false) => BashPolicy::Denied,
            BashPolicyWire::List(l) => BashPolicy::List(l),
        })
    }
}

/// Permissions embedded in a session's metadata map (§3 "Session
/// Permissions"). `trust_mode` is accepted from legacy data for
/// deserialization but is never consulted by policy code — see
/// `DESIGN.md`'s resolution of the `trust_mode` open question.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionPermissions {
    pub trust_level: TrustLevel,
    pub read: Vec<String>,
    pub write: Vec<String>,
    /// Allowed vault paths for `Vault`/`Sandboxed` trust levels. When
    /// non-empty, takes precedence over `read`/`write` for those levels.
    pub allowed_paths: Vec<String>,
    pub bash: BashPolicy,
    /// Legacy compatibility field, read-only. See module docs.
    pub trust_mode: Option<bool>,
}

impl Default for SessionPermissions {
    fn default() -> Self {
        Self {
            trust_level: TrustLevel::default(),
            read: Vec::new(),
            write: vec!["Chat/artifacts/*".to_string()],
            allowed_paths: Vec::new(),
            bash: BashPolicy::default(),
            trust_mode: None,
        }
    }
}

/// Where a session originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionSource {
    Web,
    Cli,
    Telegram,
    Discord,
    Matrix,
}

/// Whether a session's title was picked by the user or generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleSource {
    User,
    Ai,
}

/// Chat type for a bot-linked session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Dm,
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedBotChat {
    pub platform: String,
    pub chat_id: String,
    pub chat_type: ChatType,
}

/// How a session was resumed against the agent runtime (§3 "Resume Info
/// supplement").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeInfo {
    pub runtime_token: String,
    pub captured_at: DateTime<Utc>,
}

/// A durable conversation handle. Owned by the Session Store; all other
/// components hold a session ID and re-read through the store rather than a
/// long-lived reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub title: Option<String>,
    pub title_source: Option<TitleSource>,
    pub module: String,
    pub source: SessionSource,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub archived: bool,
    pub message_count: u64,
    pub working_directory: Option<String>,
    pub model: Option<String>,
    pub linked_bot: Option<LinkedBotChat>,
    pub workspace_slug: Option<String>,
    pub resume: Option<ResumeInfo>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

const PERMISSIONS_KEY: &str = "permissions";

impl Session {
    pub fn new(source: SessionSource, module: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: None,
            title_source: None,
            module: module.into(),
            source,
            created_at: now,
            last_accessed: now,
            archived: false,
            message_count: 0,
            working_directory: None,
            model: None,
            linked_bot: None,
            workspace_slug: None,
            resume: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Reads the permissions embedded in `metadata`, or the default set if
    /// absent.
    pub fn permissions(&self) -> SessionPermissions {
        self.metadata
            .get(PERMISSIONS_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// Writes `permissions` back into `metadata`. Per the monotone-grants
    /// invariant (§3), callers only ever widen an existing
    /// `SessionPermissions` before calling this.
    pub fn set_permissions(&mut self, permissions: &SessionPermissions) {
        let value = serde_json::to_value(permissions).expect("SessionPermissions always serializes");
        self.metadata.insert(PERMISSIONS_KEY.to_string(), value);
    }

    /// Updates `last_accessed` and bumps `message_count`.
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.message_count += 1;
    }
}

/// A pending operator-approval record for an unknown bot user (§3 "Pairing
/// Request").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRequest {
    pub id: Uuid,
    pub platform: String,
    pub platform_user_id: String,
    pub platform_user_display: Option<String>,
    pub platform_chat_id: String,
    pub status: PairingStatus,
    pub approved_trust_level: Option<TrustLevel>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PairingRequest {
    pub fn new(
        platform: impl Into<String>,
        platform_user_id: impl Into<String>,
        platform_user_display: Option<String>,
        platform_chat_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            platform: platform.into(),
            platform_user_id: platform_user_id.into(),
            platform_user_display,
            platform_chat_id: platform_chat_id.into(),
            status: PairingStatus::Pending,
            approved_trust_level: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bash_policy_accepts_legacy_bool_and_list_shapes() {
        let unrestricted: BashPolicy = serde_json::from_str("true").unwrap();
        assert_eq!(unrestricted, BashPolicy::Unrestricted);
        let denied: BashPolicy = serde_json::from_str("false").unwrap();
        assert_eq!(denied, BashPolicy::Denied);
        let list: BashPolicy = serde_json::from_str(r#"["ls", "pwd"]"#).unwrap();
        assert!(list.allows("ls -la"));
        assert!(!list.allows("rm -rf /"));
    }

    #[test]
    fn session_permissions_round_trip_through_metadata() {
        let mut session = Session::new(SessionSource::Web, "chat");
        let mut perms = SessionPermissions::default();
        perms.trust_level = TrustLevel::Vault;
        perms.read.push("Blogs/**/*".to_string());
        session.set_permissions(&perms);

        let read_back = session.permissions();
        assert_eq!(read_back.trust_level, TrustLevel::Vault);
        assert_eq!(read_back.read, vec!["Blogs/**/*".to_string()]);
    }

    #[test]
    fn trust_levels_order_by_privilege() {
        assert!(TrustLevel::Sandboxed < TrustLevel::Vault);
        assert!(TrustLevel::Vault < TrustLevel::Direct);
    }
}
