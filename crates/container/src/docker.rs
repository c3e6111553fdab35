//! Subprocess invocation of the `docker` CLI. Grounded on the teacher's
//! `crates/exec/src/git.rs` idiom (`tokio::process::Command`, `.output()`,
//! non-fatal handling of `ErrorKind::NotFound`), generalized from git
//! plumbing to container lifecycle plumbing.

use std::path::Path;

use tokio::process::Command;
use tracing::warn;

use crate::config::{AgentSandboxConfig, ContainerKind};
use crate::error::{ContainerError, Result};
use crate::mounts::{capability_mounts, persistence_mount, vault_mounts, Mount};
use crate::naming::HARDENING_VERSION;

pub const SANDBOX_NETWORK_NAME: &str = "parachute-sandbox-net";
pub const TOOLS_VOLUME_NAME: &str = "parachute-tools";
const SANDBOX_UID: &str = "1000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Stopped,
    Created,
    Missing,
}

/// One row of `docker ps -a --filter label=app=parachute --format {{json .}}`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ContainerListEntry {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Names")]
    pub name: String,
    #[serde(rename = "Labels")]
    pub labels: String,
}

impl ContainerListEntry {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.split(',').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == key).then_some(v)
        })
    }
}

/// Probes whether a usable container runtime is present: `docker` on
/// `$PATH` plus a successful `docker info` (§4.3 "Docker availability as a
/// soft dependency").
pub async fn probe_available() -> bool {
    match Command::new("docker").arg("info").output().await {
        Ok(o) => o.status.success(),
        Err(_) => false,
    }
}

pub async fn inspect_status(name: &str) -> Result<ContainerStatus> {
    let out = Command::new("docker")
        .args(["inspect", "--format", "{{.State.Status}}", name])
        .output()
        .await?;
    if !out.status.success() {
        return Ok(ContainerStatus::Missing);
    }
    let status = String::from_utf8_lossy(&out.stdout).trim().to_string();
    Ok(match status.as_str() {
        "running" => ContainerStatus::Running,
        "created" => ContainerStatus::Created,
        _ => ContainerStatus::Stopped,
    })
}

pub async fn start(name: &str) -> Result<()> {
    run_checked(["start", name]).await
}

pub async fn stop(name: &str, grace_secs: u32) -> Result<()> {
    run_checked(["stop", "-t", &grace_secs.to_string(), name]).await
}

pub async fn remove(name: &str) -> Result<()> {
    run_checked(["rm", "-f", name]).await
}

pub async fn ensure_network() -> Result<()> {
    let out = Command::new("docker")
        .args(["network", "inspect", SANDBOX_NETWORK_NAME])
        .output()
        .await?;
    if out.status.success() {
        return Ok(());
    }
    run_checked(["network", "create", "--internal", SANDBOX_NETWORK_NAME]).await
}

pub async fn ensure_tools_volume() -> Result<()> {
    let out = Command::new("docker")
        .args(["volume", "inspect", TOOLS_VOLUME_NAME])
        .output()
        .await?;
    if out.status.success() {
        return Ok(());
    }
    run_checked(["volume", "create", TOOLS_VOLUME_NAME]).await
}

/// Lists every container carrying the `app=parachute` label, for startup
/// reconciliation (§4.3 "Reconcile on startup").
pub async fn list_labeled() -> Result<Vec<ContainerListEntry>> {
    let out = Command::new("docker")
        .args(["ps", "-a", "--filter", "label=app=parachute", "--format", "{{json .}}"])
        .output()
        .await?;
    if !out.status.success() {
        return Err(ContainerError::RuntimeFailure(
            String::from_utf8_lossy(&out.stderr).to_string(),
        ));
    }
    let stdout = String::from_utf8_lossy(&out.stdout);
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(ContainerError::from))
        .collect()
}

async fn run_checked<const N: usize>(args: [&str; N]) -> Result<()> {
    let out = Command::new("docker").args(args).output().await?;
    if out.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&out.stderr).to_string();
        warn!(%stderr, args = ?args, "docker command failed");
        Err(ContainerError::RuntimeFailure(stderr))
    }
}

fn mount_args(mounts: &[Mount]) -> Vec<String> {
    mounts
        .iter()
        .flat_map(|m| {
            let ro = if m.read_only { ":ro" } else { "" };
            vec![
                "-v".to_string(),
                format!("{}:{}{}", m.host_path.display(), m.container_path.display(), ro),
            ]
        })
        .collect()
}

/// Hardening flags shared by every sandbox container (§4.3 "Kernel
/// surface").
fn hardening_args(memory_mb: u64, cpu_quota: f64) -> Vec<String> {
    vec![
        "--cap-drop".into(),
        "ALL".into(),
        "--security-opt".into(),
        "no-new-privileges".into(),
        "--pids-limit".into(),
        "100".into(),
        "--memory".into(),
        format!("{memory_mb}m"),
        "--memory-swap".into(),
        format!("{memory_mb}m"),
        "--cpus".into(),
        cpu_quota.to_string(),
        "--tmpfs".into(),
        format!("/scratch:size=512m,uid={SANDBOX_UID}"),
        "--tmpfs".into(),
        format!("/tmp:uid={SANDBOX_UID}"),
        "--tmpfs".into(),
        format!("/run:uid={SANDBOX_UID}"),
        "--init".into(),
    ]
}

fn network_args(network_enabled: bool) -> Vec<String> {
    if network_enabled {
        vec!["--network".into(), SANDBOX_NETWORK_NAME.into(), "--add-host".into(), "host.docker.internal:host-gateway".into()]
    } else {
        vec!["--network".into(), "none".into()]
    }
}

/// `docker run --rm` for a one-shot ephemeral turn.
pub fn build_ephemeral_run_args(name: &str, cfg: &AgentSandboxConfig) -> Vec<String> {
    let mut args = vec!["run".to_string(), "--rm".to_string(), "--name".to_string(), name.to_string(), "-i".to_string()];
    args.extend(hardening_args(cfg.memory_mb, cfg.cpu_quota));
    args.extend(network_args(cfg.network_enabled));
    args.extend(labels(ContainerKind::Ephemeral, cfg));
    args.extend(mount_args(&vault_mounts(&cfg.vault_root, &cfg.allowed_paths)));
    args.extend(mount_args(&capability_mounts(&cfg.capabilities)));
    args.push(cfg.image.clone());
    args
}

/// `docker run -d` long-lived container with `sleep infinity` as PID 1
/// (§4.3 "ensure_session_container").
pub fn build_persistent_run_args(
    name: &str,
    kind: ContainerKind,
    cfg: &AgentSandboxConfig,
    host_claude_dir: &Path,
    memory_mb: u64,
) -> Vec<String> {
    let mut args = vec!["run".to_string(), "-d".to_string(), "--name".to_string(), name.to_string()];
    args.extend(hardening_args(memory_mb, cfg.cpu_quota));
    args.extend(network_args(cfg.network_enabled));
    args.extend(labels(kind, cfg));
    args.extend(mount_args(&vault_mounts(&cfg.vault_root, &cfg.allowed_paths)));
    args.extend(mount_args(&capability_mounts(&cfg.capabilities)));
    args.extend(mount_args(&[persistence_mount(host_claude_dir)]));
    args.extend(["-v".to_string(), format!("{TOOLS_VOLUME_NAME}:/tools:ro")]);
    args.push(cfg.image.clone());
    args.extend(["sleep".to_string(), "infinity".to_string()]);
    args
}

fn labels(kind: ContainerKind, cfg: &AgentSandboxConfig) -> Vec<String> {
    let hash = crate::naming::config_hash(&cfg.image, cfg.memory_mb, cfg.cpu_quota, HARDENING_VERSION);
    let mut labels = vec![
        "-l".to_string(),
        "app=parachute".to_string(),
        "-l".to_string(),
        format!("type={}", kind.label()),
        "-l".to_string(),
        format!("config_hash={hash}"),
    ];
    match kind {
        ContainerKind::NamedEnv => {
            if let Some(slug) = &cfg.env_slug {
                labels.push("-l".to_string());
                labels.push(format!("env_slug={slug}"));
            }
        }
        _ => {
            labels.push("-l".to_string());
            labels.push(format!("session_id={}", cfg.session_id));
        }
    }
    labels
}

/// `docker exec -i <name> <entrypoint>`, to run the agent inside an
/// already-running persistent container.
pub fn build_exec_args(name: &str) -> Vec<String> {
    vec!["exec".to_string(), "-i".to_string(), name.to_string(), "/entrypoint".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSandboxConfig;
    use crate::mounts::CapabilityPaths;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn cfg() -> AgentSandboxConfig {
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

    #[test]
    fn ephemeral_args_are_rm_and_no_network_when_disabled() {
        let args = build_ephemeral_run_args("parachute-sandbox-abcd1234", &cfg());
        assert!(args.contains(&"--rm".to_string()));
        assert!(args.windows(2).any(|w| w == ["--network".to_string(), "none".to_string()]));
        assert!(args.contains(&"app=parachute".to_string()));
    }

    #[test]
    fn network_enabled_attaches_bridge_and_gateway_alias() {
        let mut config = cfg();
        config.network_enabled = true;
        let args = build_ephemeral_run_args("x", &config);
        assert!(args.windows(2).any(|w| w == ["--network".to_string(), SANDBOX_NETWORK_NAME.to_string()]));
        assert!(args.iter().any(|a| a == "host.docker.internal:host-gateway"));
    }

    #[test]
    fn label_parses_key_value_pairs() {
        let entry = ContainerListEntry {
            id: "abc".to_string(),
            name: "parachute-session-abc".to_string(),
            labels: "app=parachute,type=session,session_id=abc123".to_string(),
        };
        assert_eq!(entry.label("type"), Some("session"));
        assert_eq!(entry.label("session_id"), Some("abc123"));
        assert_eq!(entry.label("missing"), None);
    }
}
