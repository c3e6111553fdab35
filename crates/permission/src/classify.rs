//! Re-architected tool classification (§9 "Re-architecture of dynamic 'tool
//! classification'"): a tagged-union mapping from the tool-name lexicon to a
//! classification enum, rather than runtime name-prefix dispatch scattered
//! across the decision procedure. The `mcp__` prefix rule is kept as a
//! fallback for tool names the lexicon doesn't know about.

/// §4.2 "Tool classification" table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolClass {
    AlwaysAllow,
    Read,
    Write,
    Bash,
    AskUser,
    Unknown,
}

const ALWAYS_ALLOWED_TOOLS: &[&str] = &["WebSearch", "WebFetch", "Task", "TaskOutput"];
const READ_TOOLS: &[&str] = &["Read", "Glob", "Grep", "LS", "NotebookRead", "LSP"];
const WRITE_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

pub fn classify(tool_name: &str) -> ToolClass {
    if tool_name == "AskUserQuestion" {
        return ToolClass::AskUser;
    }
    if tool_name.starts_with("mcp__") {
        return ToolClass::AlwaysAllow;
    }
    if ALWAYS_ALLOWED_TOOLS.contains(&tool_name) {
        return ToolClass::AlwaysAllow;
    }
    if READ_TOOLS.contains(&tool_name) {
        return ToolClass::Read;
    }
    if WRITE_TOOLS.contains(&tool_name) {
        return ToolClass::Write;
    }
    if tool_name == "Bash" {
        return ToolClass::Bash;
    }
    ToolClass::Unknown
}

/// Dangerous shell patterns, rejected regardless of trust level (§4.2
/// "Dangerous-shell filter").
const DANGEROUS_PATTERNS: &[(&str, &str)] = &[
    ("sudo", "sudo commands are not allowed"),
    ("rm -rf /", "cannot delete root filesystem"),
    ("rm -rf ~", "cannot delete home directory"),
    ("rm -rf /*", "cannot delete root filesystem"),
    (":(){:|:&};:", "fork bomb detected"),
    ("mkfs", "cannot format filesystems"),
    ("dd if=", "direct disk access not allowed"),
    ("> /dev/", "cannot write to device files"),
    ("chmod -R 777 /", "cannot change permissions on root"),
];

/// Returns the denial reason if `command` matches a dangerous pattern.
pub fn dangerous_command_reason(command: &str) -> Option<&'static str> {
    let lowered = command.to_lowercase();
    // The fork-bomb signature is spelled with or without interior spaces
    // (`:(){ :|:& };:` vs `:(){:|:&};:`); strip whitespace before matching
    // so either form is caught.
    let collapsed: String = lowered.chars().filter(|c| !c.is_whitespace()).collect();
    DANGEROUS_PATTERNS
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern) || collapsed.contains(pattern))
        .map(|(_, reason)| *reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_tools() {
        assert_eq!(classify("mcp__vault__read"), ToolClass::AlwaysAllow);
        assert_eq!(classify("WebSearch"), ToolClass::AlwaysAllow);
        assert_eq!(classify("Read"), ToolClass::Read);
        assert_eq!(classify("Write"), ToolClass::Write);
        assert_eq!(classify("Bash"), ToolClass::Bash);
        assert_eq!(classify("AskUserQuestion"), ToolClass::AskUser);
        assert_eq!(classify("SomeCustomTool"), ToolClass::Unknown);
    }

    #[test]
    fn flags_dangerous_shell_patterns() {
        assert!(dangerous_command_reason("sudo rm -rf /tmp").is_some());
        assert!(dangerous_command_reason("rm -rf /").is_some());
        assert!(dangerous_command_reason("dd if=/dev/zero of=/dev/sda").is_some());
        assert!(dangerous_command_reason("ls -la").is_none());
    }
}
