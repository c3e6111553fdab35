//! Process-wide configuration: a TOML file on disk, environment overrides for
//! anything secret-shaped, and an `AppConfig` aggregate every other crate in
//! the workspace is handed a clone of at startup.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// HTTP auth mode. See the `/api/*` surface: `disabled` never checks a key,
/// `remote` bypasses the check for loopback callers, `always` checks
/// everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Disabled,
    Remote,
    Always,
}

impl Default for AuthMode {
    fn default() -> Self {
        AuthMode::Remote
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub auth_mode: AuthMode,
    /// API keys accepted under `remote`/`always`. Never logged.
    pub api_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:4317".to_string(),
            auth_mode: AuthMode::default(),
            api_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub root: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStoreConfig {
    /// Path to the session database, relative to `vault.root` unless absolute.
    pub db_path: String,
    pub cache_capacity: usize,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            db_path: "Chat/sessions.db".to_string(),
            cache_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub enabled: bool,
    pub image: String,
    pub turn_deadline_secs: u64,
    pub ephemeral_memory_mb: u64,
    pub persistent_memory_mb: u64,
    pub cpu_quota: f64,
    /// Bumped whenever the hardening flags below change shape, so the
    /// config hash invalidates previously-built containers.
    pub hardening_version: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            image: "parachute/sandbox:latest".to_string(),
            turn_deadline_secs: 600,
            ephemeral_memory_mb: 512,
            persistent_memory_mb: 1536,
            cpu_quota: 1.0,
            hardening_version: "1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BotPlatformConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BotConfig {
    pub telegram: BotPlatformConfig,
    pub discord: BotPlatformConfig,
    pub matrix: BotPlatformConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// When set, a non-blocking rolling-file layer is added alongside the
    /// terminal formatter.
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub vault: VaultConfig,
    pub session_store: SessionStoreConfig,
    pub container: ContainerConfig,
    pub bot: BotConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads from `path`, falling back to defaults for any field the file
    /// omits or for a missing file entirely. Bot tokens are intentionally
    /// absent from this struct; they come from the environment, see
    /// [`AppConfig::telegram_token`] and friends.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Resolves `session_store.db_path` against `vault.root` when relative.
    pub fn session_db_path(&self) -> std::path::PathBuf {
        let db = Path::new(&self.session_store.db_path);
        if db.is_absolute() {
            db.to_path_buf()
        } else {
            Path::new(&self.vault.root).join(db)
        }
    }

    pub fn telegram_token(&self) -> Option<String> {
        env_nonempty("TELEGRAM_BOT_TOKEN")
    }

    pub fn discord_token(&self) -> Option<String> {
        env_nonempty("DISCORD_BOT_TOKEN")
    }

    pub fn matrix_token(&self) -> Option<String> {
        env_nonempty("MATRIX_ACCESS_TOKEN")
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable_without_a_file() {
        let config = AppConfig::load_from("/nonexistent/parachute.toml").unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:4317");
        assert_eq!(config.server.auth_mode, AuthMode::Remote);
        assert!(config.container.enabled);
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parachute.toml");

        let mut config = AppConfig::default();
        config.server.auth_mode = AuthMode::Always;
        config.server.api_keys.push("k-1".to_string());
        config.vault.root = "/home/user/vault".to_string();
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.server.auth_mode, AuthMode::Always);
        assert_eq!(loaded.server.api_keys, vec!["k-1".to_string()]);
        assert_eq!(loaded.vault.root, "/home/user/vault");
    }

    #[test]
    fn session_db_path_resolves_against_vault_root_when_relative() {
        let mut config = AppConfig::default();
        config.vault.root = "/vault".to_string();
        config.session_store.db_path = "Chat/sessions.db".to_string();
        assert_eq!(
            config.session_db_path(),
            std::path::PathBuf::from("/vault/Chat/sessions.db")
        );

        config.session_store.db_path = "/abs/sessions.db".to_string();
        assert_eq!(
            config.session_db_path(),
            std::path::PathBuf::from("/abs/sessions.db")
        );
    }
}
