//! Container naming and the config-hash reconciliation key (§4.3 "Container
//! naming", "Config hash").

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hardening flags version. Bump whenever the fixed set of `docker run`
/// isolation flags changes, so running containers get recreated rather than
/// silently left on stale hardening.
pub const HARDENING_VERSION: &str = "1";

pub fn ephemeral_name(session_id: Uuid) -> String {
    format!("parachute-sandbox-{}", short_id(session_id, 8))
}

pub fn session_name(session_id: Uuid) -> String {
    format!("parachute-session-{}", short_id(session_id, 12))
}

pub fn env_name(slug: &str) -> String {
    format!("parachute-env-{slug}")
}

fn short_id(id: Uuid, len: usize) -> String {
    let hex = id.simple().to_string();
    hex[..len.min(hex.len())].to_string()
}

/// A deterministic short digest over everything that should force a
/// container rebuild when changed: image tag, memory/CPU limits, hardening
/// version.
pub fn config_hash(image: &str, memory_mb: u64, cpu_quota: f64, hardening_version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.as_bytes());
    hasher.update(memory_mb.to_le_bytes());
    hasher.update(cpu_quota.to_le_bytes());
    hasher.update(hardening_version.as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 12)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for byte in bytes {
        if out.len() >= len {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_stable_and_bounded() {
        let id = Uuid::new_v4();
        assert!(ephemeral_name(id).starts_with("parachute-sandbox-"));
        assert_eq!(ephemeral_name(id), ephemeral_name(id));
        assert_ne!(ephemeral_name(id), session_name(id));
        assert_eq!(env_name("my-slug"), "parachute-env-my-slug");
    }

    #[test]
    fn config_hash_changes_with_any_input() {
        let base = config_hash("parachute/sandbox:latest", 512, 1.0, "1");
        assert_eq!(base.len(), 12);
        assert_ne!(base, config_hash("parachute/sandbox:v2", 512, 1.0, "1"));
        assert_ne!(base, config_hash("parachute/sandbox:latest", 1024, 1.0, "1"));
        assert_ne!(base, config_hash("parachute/sandbox:latest", 512, 2.0, "1"));
        assert_ne!(base, config_hash("parachute/sandbox:latest", 512, 1.0, "2"));
        assert_eq!(base, config_hash("parachute/sandbox:latest", 512, 1.0, "1"));
    }
}
