//! C1: path glob match against a fixed deny list.
//!
//! Deny-list supremacy (testable property 3) means this matcher is consulted
//! before trust level, before session permissions, before everything else —
//! see `parachute-permission`'s decision procedure.

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Patterns that are always denied, regardless of trust level or explicit
/// grants. Paths are expected normalized to vault-relative form before
/// matching (leading `./` or `/` stripped).
const BUILTIN_DENY_PATTERNS: &[&str] = &[
    ".env",
    ".env.*",
    "**/*.key",
    "**/*.pem",
    "node_modules/**",
    "**/.git/**",
    "**/id_rsa",
    "**/id_ed25519",
    "**/*.p12",
];

pub struct DenyMatcher {
    set: GlobSet,
    patterns: Vec<String>,
}

impl DenyMatcher {
    /// Builds the matcher from the built-in patterns plus any operator
    /// additions (§6 "Persisted layout": "a fixed built-in pattern set plus
    /// optional user additions").
    pub fn new(extra_patterns: &[String]) -> Self {
        let mut patterns: Vec<String> = BUILTIN_DENY_PATTERNS.iter().map(|s| s.to_string()).collect();
        patterns.extend(extra_patterns.iter().cloned());

        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            } else {
                tracing::warn!(pattern, "skipping malformed deny pattern");
            }
        }
        let set = builder.build().expect("deny patterns are validated individually above");

        Self { set, patterns }
    }

    /// `path` must already be normalized to vault-relative form.
    pub fn is_denied(&self, path: &str) -> bool {
        self.set.is_match(path)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for DenyMatcher {
    fn default() -> Self {
        Self::new(&[])
    }
}

/// Strips a leading vault-prefix and any `./`/`/` so callers can feed both
/// absolute and vault-relative paths through the same matcher.
pub fn normalize_vault_path(vault_root: &str, path: &str) -> String {
    let stripped = path.strip_prefix(vault_root).unwrap_or(path);
    stripped.trim_start_matches('/').trim_start_matches("./").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_builtin_patterns() {
        let matcher = DenyMatcher::default();
        assert!(matcher.is_denied(".env"));
        assert!(matcher.is_denied(".env.local"));
        assert!(matcher.is_denied("secrets/id_rsa.key"));
        assert!(matcher.is_denied("certs/server.pem"));
        assert!(matcher.is_denied("node_modules/pkg/index.js"));
        assert!(!matcher.is_denied("Blogs/post.md"));
    }

    #[test]
    fn honors_operator_additions() {
        let matcher = DenyMatcher::new(&["Private/**".to_string()]);
        assert!(matcher.is_denied("Private/diary.md"));
        assert!(matcher.patterns().iter().any(|p| p == "Private/**"));
    }

    #[test]
    fn normalizes_vault_prefixed_paths() {
        assert_eq!(normalize_vault_path("/vault", "/vault/Blogs/post.md"), "Blogs/post.md");
        assert_eq!(normalize_vault_path("/vault", "./Blogs/post.md"), "Blogs/post.md");
        assert_eq!(normalize_vault_path("/vault", "Blogs/post.md"), "Blogs/post.md");
    }
}
