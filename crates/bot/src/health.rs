//! Connector health snapshot and error sanitization (§4.5 "Health surface").

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::state::ConnectorState;

#[derive(Debug, Clone, Serialize)]
pub struct ConnectorHealth {
    pub platform: String,
    pub state: ConnectorState,
    pub failure_count: u64,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub uptime_secs: Option<u64>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub allowed_users_count: usize,
}

fn sensitive_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"(?i)(bot|token)[\"']?\s*[:=]\s*[\"']?[a-zA-Z0-9:_-]{20,}").unwrap(),
                "$1=<redacted>",
            ),
            (Regex::new(r"(?i)/[a-z0-9_.\-]+/\.parachute/\S*").unwrap(), "~/.parachute/<redacted>"),
        ]
    })
}

/// Scrubs tokens and absolute vault paths out of an error's display text
/// before it can be exposed over `/api/*` health endpoints, and clips it to
/// a bounded length.
pub fn sanitize_error(type_name: &str, message: &str) -> String {
    let mut scrubbed = message.to_string();
    for (pattern, replacement) in sensitive_patterns() {
        scrubbed = pattern.replace_all(&scrubbed, *replacement).into_owned();
    }
    let scrubbed: String = scrubbed.chars().take(200).collect();
    format!("{type_name}: {scrubbed}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_bot_tokens() {
        let sanitized = sanitize_error("Error", "bot_token=abcd1234567890efghijklmnop failed");
        assert!(!sanitized.contains("abcd1234567890efghijklmnop"));
    }

    #[test]
    fn redacts_parachute_vault_paths() {
        let sanitized = sanitize_error("Error", "file missing: /home/alice/.parachute/secrets.toml");
        assert!(!sanitized.contains("/home/alice"));
        assert!(sanitized.contains("~/.parachute/<redacted>"));
    }

    #[test]
    fn clips_to_two_hundred_characters() {
        let sanitized = sanitize_error("Error", &"x".repeat(500));
        assert!(sanitized.len() < 500 + "Error: ".len());
    }
}
