//! In-memory Permission Request and User Question Request records (§3).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Granted,
    Denied,
    Timeout,
}

/// A single question in an `AskUserQuestion` round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSpec {
    pub question: String,
    #[serde(default)]
    pub choices: Vec<String>,
}

/// Snapshot handed to listeners when a tool call needs operator approval.
/// Carries enough information for a UI to render a graduated-grant prompt
/// (§4.2 "Grant pattern suggestions").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequestInfo {
    pub id: String,
    pub session_id: Uuid,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub file_path: Option<String>,
    pub suggestions: Vec<GrantSuggestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantSuggestion {
    pub scope: &'static str,
    pub pattern: String,
    pub label: String,
}

/// Snapshot handed to listeners for an `AskUserQuestion` round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuestionInfo {
    pub id: String,
    pub session_id: Uuid,
    pub tool_use_id: String,
    pub questions: Vec<QuestionSpec>,
}

/// Events the handler emits to whatever is multiplexing them onto the
/// session's stream (the orchestrator, via C7). Kept as a flat enum rather
/// than a trait object so the handler has no dependency on the stream crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PermissionEvent {
    Request(PermissionRequestInfo),
    Question(UserQuestionInfo),
}

/// The operator's resolution of a pending approval.
#[derive(Debug, Clone)]
pub enum Resolution {
    Granted { pattern: Option<String> },
    Denied,
}

/// §4.2 "Grant pattern suggestions": narrowest to broadest, given a denied
/// vault-relative path.
pub fn suggest_grants(path: &str) -> Vec<GrantSuggestion> {
    let mut suggestions = Vec::new();
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let file_name = parts.last().copied().unwrap_or(path);

    suggestions.push(GrantSuggestion {
        scope: "file",
        pattern: path.to_string(),
        label: format!("This file only ({file_name})"),
    });

    if parts.len() > 1 {
        let folder = parts[..parts.len() - 1].join("/");
        suggestions.push(GrantSuggestion {
            scope: "folder",
            pattern: format!("{folder}/*"),
            label: format!("{folder}/ folder"),
        });
        suggestions.push(GrantSuggestion {
            scope: "recursive",
            pattern: format!("{folder}/**/*"),
            label: format!("{folder}/ and subfolders"),
        });
    }

    if parts.len() > 2 {
        let root = parts[0];
        suggestions.push(GrantSuggestion {
            scope: "root",
            pattern: format!("{root}/**/*"),
            label: format!("All of {root}/"),
        });
    }

    suggestions.push(GrantSuggestion {
        scope: "vault",
        pattern: "**/*".to_string(),
        label: "Full vault access".to_string(),
    });

    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_grants_from_narrowest_to_broadest() {
        let suggestions = suggest_grants("Blogs/drafts/post.md");
        let scopes: Vec<&str> = suggestions.iter().map(|s| s.scope).collect();
        assert_eq!(scopes, vec!["file", "folder", "recursive", "root", "vault"]);
        assert_eq!(suggestions[0].pattern, "Blogs/drafts/post.md");
        assert_eq!(suggestions.last().unwrap().pattern, "**/*");
    }

    #[test]
    fn top_level_file_skips_root_suggestion() {
        let suggestions = suggest_grants("readme.md");
        let scopes: Vec<&str> = suggestions.iter().map(|s| s.scope).collect();
        assert_eq!(scopes, vec!["file", "vault"]);
    }
}
