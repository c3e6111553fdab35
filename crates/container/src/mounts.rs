//! Filesystem and capability mount assembly (§4.3 "Isolation primitives —
//! Filesystem"). Grounded on the Python original's `_build_mounts` /
//! `_build_capability_mounts`: everything capability-related mounts
//! read-only, allow-listed vault globs get their `**` suffix stripped down
//! to a directory before mounting.

use std::path::{Path, PathBuf};

/// One `--mount`/`-v` entry worth of information; the subprocess builder
/// turns these into actual `docker run` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub read_only: bool,
}

impl Mount {
    fn ro(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self { host_path: host.into(), container_path: container.into(), read_only: true }
    }

    fn rw(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self { host_path: host.into(), container_path: container.into(), read_only: false }
    }
}

/// Capability files mounted read-only into every container regardless of
/// trust level: MCP config, skills dir, custom agents dir, vault-root
/// context file, plugin dirs.
pub struct CapabilityPaths {
    pub mcp_config: Option<PathBuf>,
    pub skills_dir: Option<PathBuf>,
    pub custom_agents_dir: Option<PathBuf>,
    pub context_file: Option<PathBuf>,
    pub plugin_dirs: Vec<PathBuf>,
}

/// Strips a trailing glob (`**/*`, `**`, `*`) off an allowed-path pattern to
/// obtain the directory that should actually be mounted.
fn glob_to_directory(pattern: &str) -> &str {
    pattern
        .trim_end_matches("/**/*")
        .trim_end_matches("/**")
        .trim_end_matches("/*")
        .trim_end_matches('*')
}

/// Builds the vault filesystem mounts for a turn. With no allow list, the
/// whole vault is mounted read-only; otherwise each allowed glob's directory
/// is mounted read-write (the container-side tool layer still enforces the
/// original glob, this only bounds what's visible).
pub fn vault_mounts(vault_root: &Path, allowed_paths: &[String]) -> Vec<Mount> {
    if allowed_paths.is_empty() {
        return vec![Mount::ro(vault_root, "/vault")];
    }

    let mut seen = std::collections::BTreeSet::new();
    let mut mounts = Vec::new();
    for pattern in allowed_paths {
        let dir = glob_to_directory(pattern);
        let dir = dir.trim_matches('/');
        if dir.is_empty() || !seen.insert(dir.to_string()) {
            continue;
        }
        mounts.push(Mount::rw(vault_root.join(dir), PathBuf::from("/vault").join(dir)));
    }
    mounts
}

pub fn capability_mounts(caps: &CapabilityPaths) -> Vec<Mount> {
    let mut mounts = Vec::new();
    if let Some(path) = &caps.mcp_config {
        mounts.push(Mount::ro(path, "/capabilities/mcp.json"));
    }
    if let Some(path) = &caps.skills_dir {
        mounts.push(Mount::ro(path, "/capabilities/skills"));
    }
    if let Some(path) = &caps.custom_agents_dir {
        mounts.push(Mount::ro(path, "/capabilities/agents"));
    }
    if let Some(path) = &caps.context_file {
        mounts.push(Mount::ro(path, "/capabilities/CONTEXT.md"));
    }
    for (i, dir) in caps.plugin_dirs.iter().enumerate() {
        mounts.push(Mount::ro(dir, format!("/capabilities/plugins/{i}")));
    }
    mounts
}

/// Per-session or per-named-env persistent home for `.claude/`, created on
/// the host with mode 0700 (§4.3 "Resource limits & tmpfs ownership").
pub fn persistence_mount(host_claude_dir: &Path) -> Mount {
    Mount::rw(host_claude_dir, "/root/.claude")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_mounts_whole_vault_read_only() {
        let mounts = vault_mounts(Path::new("/vault"), &[]);
        assert_eq!(mounts.len(), 1);
        assert!(mounts[0].read_only);
        assert_eq!(mounts[0].container_path, PathBuf::from("/vault"));
    }

    #[test]
    fn recursive_globs_are_stripped_to_their_directory() {
        let mounts = vault_mounts(Path::new("/vault"), &["Blogs/**/*".to_string(), "Blogs/drafts/*".to_string()]);
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].host_path, PathBuf::from("/vault/Blogs"));
        assert!(!mounts[0].read_only);
    }

    #[test]
    fn capability_paths_are_all_read_only() {
        let caps = CapabilityPaths {
            mcp_config: Some(PathBuf::from("/etc/mcp.json")),
            skills_dir: Some(PathBuf::from("/etc/skills")),
            custom_agents_dir: None,
            context_file: None,
            plugin_dirs: vec![PathBuf::from("/etc/plugins/a")],
        };
        let mounts = capability_mounts(&caps);
        assert_eq!(mounts.len(), 3);
        assert!(mounts.iter().all(|m| m.read_only));
    }
}
