//! C4 Container Sandbox Manager. Grounded on the Python original's
//! `DockerSandbox`: per-name locking around `_ensure_container`, the
//! startup `reconcile` sweep, and the ephemeral/persistent run paths.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AgentSandboxConfig, ContainerKind};
use crate::docker::{self, ContainerStatus};
use crate::error::{ContainerError, Result};
use crate::naming::{self, HARDENING_VERSION};
use crate::stream::{self, ContainerEvent};

/// Cached verdict from the one-time startup probe (§4.3 "Docker
/// availability as a soft dependency").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Availability {
    Unknown,
    Available,
    Unavailable,
}

pub struct ContainerManager {
    vault_root: PathBuf,
    sandbox_home: PathBuf,
    availability: std::sync::RwLock<Availability>,
    name_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContainerManager {
    pub fn new(vault_root: PathBuf) -> Self {
        let sandbox_home = vault_root.join(".parachute").join("sandbox");
        Self {
            vault_root,
            sandbox_home,
            availability: std::sync::RwLock::new(Availability::Unknown),
            name_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Probes for a usable `docker` once and caches the verdict. Cheap to
    /// call again; only the first call spawns a subprocess.
    pub async fn probe(&self) -> bool {
        {
            let cached = *self.availability.read().unwrap();
            match cached {
                Availability::Available => return true,
                Availability::Unavailable => return false,
                Availability::Unknown => {}
            }
        }
        let available = docker::probe_available().await;
        *self.availability.write().unwrap() = if available {
            Availability::Available
        } else {
            Availability::Unavailable
        };
        if !available {
            warn!("container runtime unavailable; sandboxed turns will fail over to direct execution");
        }
        available
    }

    fn ensure_ready(&self) -> Result<()> {
        match *self.availability.read().unwrap() {
            Availability::Unavailable => Err(ContainerError::SandboxUnavailable),
            _ => Ok(()),
        }
    }

    async fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.name_locks.lock().await;
        locks.entry(name.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn session_claude_dir(&self, session_id: Uuid) -> PathBuf {
        self.sandbox_home.join("sessions").join(naming::session_name(session_id).replace("parachute-session-", "")).join(".claude")
    }

    fn named_env_claude_dir(&self, slug: &str) -> PathBuf {
        self.sandbox_home.join("envs").join(slug).join(".claude")
    }

    /// Runs one ephemeral turn end to end: `docker run --rm -i`, writes the
    /// entrypoint payload to stdin, streams JSONL events back, enforces the
    /// turn deadline, and maps exit 137 to `ContainerError::Oom`.
    pub async fn run_agent(
        &self,
        cfg: &AgentSandboxConfig,
        payload: Vec<u8>,
    ) -> Result<impl Stream<Item = Result<ContainerEvent>>> {
        self.ensure_ready()?;
        let name = naming::ephemeral_name(cfg.session_id);
        let args = docker::build_ephemeral_run_args(&name, cfg);

        let mut child = Command::new("docker")
            .args(&args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        stream::send_payload(&mut child, &payload).await?;
        let deadline = Duration::from_secs(cfg.turn_deadline_secs);
        let name_for_oom = name.clone();
        let events = stream::events(child, deadline).map(move |event| match event {
            Ok(ContainerEvent::Exited { code }) if stream::is_oom_exit(code) => {
                let name = name_for_oom.clone();
                tokio::spawn(async move {
                    if let Err(e) = docker::remove(&name).await {
                        warn!(error = %e, %name, "failed to remove OOM-killed ephemeral container");
                    }
                });
                Err(ContainerError::Oom)
            }
            other => other,
        });
        Ok(events)
    }

    /// Ensures a long-lived per-session container exists and is running
    /// (§4.3 "ensure_session_container").
    pub async fn ensure_session_container(&self, cfg: &AgentSandboxConfig) -> Result<String> {
        self.ensure_ready()?;
        let name = naming::session_name(cfg.session_id);
        self.ensure_persistent(&name, ContainerKind::Session, cfg, &self.session_claude_dir(cfg.session_id)).await?;
        Ok(name)
    }

    pub async fn ensure_named_container(&self, slug: &str, cfg: &AgentSandboxConfig) -> Result<String> {
        self.ensure_ready()?;
        let name = naming::env_name(slug);
        self.ensure_persistent(&name, ContainerKind::NamedEnv, cfg, &self.named_env_claude_dir(slug)).await?;
        Ok(name)
    }

    async fn ensure_persistent(
        &self,
        name: &str,
        kind: ContainerKind,
        cfg: &AgentSandboxConfig,
        claude_dir: &PathBuf,
    ) -> Result<()> {
        let lock = self.lock_for(name).await;
        let _guard = lock.lock().await;

        docker::ensure_network().await?;
        docker::ensure_tools_volume().await?;
        std::fs::create_dir_all(claude_dir).map_err(ContainerError::Io)?;
        set_host_dir_private(claude_dir);

        match docker::inspect_status(name).await? {
            ContainerStatus::Running => Ok(()),
            ContainerStatus::Stopped | ContainerStatus::Created => {
                docker::start(name).await?;
                Ok(())
            }
            ContainerStatus::Missing => {
                let args = docker::build_persistent_run_args(name, kind, cfg, claude_dir, persistent_memory_mb(cfg));
                let out = Command::new("docker").args(&args).output().await?;
                if !out.status.success() {
                    return Err(ContainerError::RuntimeFailure(
                        String::from_utf8_lossy(&out.stderr).to_string(),
                    ));
                }
                info!(%name, "created persistent sandbox container");
                Ok(())
            }
        }
    }

    /// Runs a turn inside an already-ensured container (named if
    /// `cfg.env_slug` is set, else per-session) via `docker exec`.
    pub async fn run_session(
        &self,
        cfg: &AgentSandboxConfig,
        payload: Vec<u8>,
    ) -> Result<impl Stream<Item = Result<ContainerEvent>>> {
        let name = if let Some(slug) = &cfg.env_slug {
            self.ensure_named_container(slug, cfg).await?
        } else {
            self.ensure_session_container(cfg).await?
        };

        let args = docker::build_exec_args(&name);
        let mut child = Command::new("docker")
            .args(&args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;
        stream::send_payload(&mut child, &payload).await?;

        let deadline = Duration::from_secs(cfg.turn_deadline_secs);
        let name_for_oom = name.clone();
        let events = stream::events(child, deadline).map(move |event| match event {
            Ok(ContainerEvent::Exited { code }) if stream::is_oom_exit(code) => {
                let name = name_for_oom.clone();
                tokio::spawn(async move {
                    if let Err(e) = docker::remove(&name).await {
                        warn!(error = %e, %name, "failed to remove OOM-killed session container");
                    }
                });
                Err(ContainerError::Oom)
            }
            other => other,
        });
        Ok(events)
    }

    pub async fn stop_session_container(&self, session_id: Uuid) -> Result<()> {
        let name = naming::session_name(session_id);
        docker::stop(&name, 10).await
    }

    pub async fn delete_named_container(&self, slug: &str) -> Result<()> {
        let name = naming::env_name(slug);
        docker::remove(&name).await
    }

    /// Startup reconciliation: removes obsolete/orphaned containers, leaves
    /// named envs running, and removes anything whose `config_hash` no
    /// longer matches (§4.3 "Reconcile on startup").
    pub async fn reconcile(&self, live_session_ids: &[Uuid], current_image: &str, memory_mb: u64, cpu_quota: f64) -> Result<()> {
        if !self.probe().await {
            return Ok(());
        }
        let current_hash = naming::config_hash(current_image, memory_mb, cpu_quota, HARDENING_VERSION);
        let containers = docker::list_labeled().await?;
        let live_prefixes: Vec<String> = live_session_ids.iter().map(|id| id.simple().to_string()[..12].to_string()).collect();

        let mut to_remove = Vec::new();
        for entry in &containers {
            match entry.label("type") {
                Some("session") => {
                    let Some(session_id) = entry.label("session_id") else {
                        to_remove.push(entry.name.clone());
                        continue;
                    };
                    if !live_prefixes.iter().any(|p| session_id.starts_with(p.as_str())) {
                        to_remove.push(entry.name.clone());
                    } else if entry.label("config_hash") != Some(current_hash.as_str()) {
                        to_remove.push(entry.name.clone());
                    }
                }
                Some("named-env") => {
                    info!(name = %entry.name, "leaving named environment container running across restart");
                }
                Some("ephemeral") => to_remove.push(entry.name.clone()),
                _ => to_remove.push(entry.name.clone()),
            }
        }

        futures::future::join_all(to_remove.iter().map(|name| async move {
            if let Err(e) = docker::remove(name).await {
                warn!(error = %e, %name, "failed to remove container during reconciliation");
            }
        }))
        .await;

        Ok(())
    }
}

fn persistent_memory_mb(cfg: &AgentSandboxConfig) -> u64 {
    if cfg.memory_mb < 1536 { 1536 } else { cfg.memory_mb }
}

#[cfg(unix)]
fn set_host_dir_private(dir: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(dir) {
        let mut perms = meta.permissions();
        perms.set_mode(0o700);
        let _ = std::fs::set_permissions(dir, perms);
    }
}

#[cfg(not(unix))]
fn set_host_dir_private(_dir: &std::path::Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistent_memory_floor_is_1536mb() {
        let mut cfg = test_cfg();
        cfg.memory_mb = 512;
        assert_eq!(persistent_memory_mb(&cfg), 1536);
        cfg.memory_mb = 2048;
        assert_eq!(persistent_memory_mb(&cfg), 2048);
    }

    fn test_cfg() -> AgentSandboxConfig {
        use crate::mounts::CapabilityPaths;
        AgentSandboxConfig {
            session_id: Uuid::new_v4(),
            vault_root: PathBuf::from("/vault"),
            allowed_paths: vec![],
            network_enabled: false,
            memory_mb: 512,
            cpu_quota: 1.0,
            image: "parachute/sandbox:latest".to_string(),
            turn_deadline_secs: 600,
            capabilities: CapabilityPaths {
                mcp_config: None,
                skills_dir: None,
                custom_agents_dir: None,
                context_file: None,
                plugin_dirs: vec![],
            },
            env_slug: None,
            resume_token: None,
            credentials: Default::default(),
            system_prompt: None,
        }
    }
}
