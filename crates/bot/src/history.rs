//! Per-chat group-message ring buffer (§4.5 "Group context buffer").
//! Telegram and Discord expose no reliable "fetch chat history" call for a
//! bot account, so incoming group messages are cached as they arrive and
//! replayed as context the next time the bot is triggered.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

pub const DEFAULT_MAX_MESSAGES_PER_CHAT: usize = 50;
pub const DEFAULT_MAX_CHATS: usize = 500;
const MAX_NAME_LEN: usize = 50;
const MAX_MESSAGE_LEN: usize = 500;

#[derive(Debug, Clone)]
pub struct GroupMessage {
    pub user_display: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub message_id: String,
}

pub struct GroupHistoryBuffer {
    max_messages: usize,
    max_chats: usize,
    buffers: HashMap<String, VecDeque<GroupMessage>>,
}

impl GroupHistoryBuffer {
    pub fn new(max_messages: usize, max_chats: usize) -> Self {
        Self { max_messages, max_chats, buffers: HashMap::new() }
    }

    /// Records `msg` under `chat_id`, evicting the oldest chat entirely
    /// once `max_chats` distinct chats are tracked.
    pub fn record(&mut self, chat_id: &str, msg: GroupMessage) {
        if !self.buffers.contains_key(chat_id) && self.buffers.len() >= self.max_chats {
            if let Some(oldest) = self.buffers.keys().next().cloned() {
                self.buffers.remove(&oldest);
            }
        }
        let buffer = self
            .buffers
            .entry(chat_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.max_messages));
        if buffer.len() >= self.max_messages {
            buffer.pop_front();
        }
        buffer.push_back(msg);
    }

    /// Recent messages for `chat_id`, oldest first, optionally excluding the
    /// triggering message.
    pub fn recent(&self, chat_id: &str, exclude_message_id: Option<&str>) -> Vec<GroupMessage> {
        self.buffers
            .get(chat_id)
            .into_iter()
            .flatten()
            .filter(|m| exclude_message_id.is_none_or(|id| m.message_id != id))
            .cloned()
            .collect()
    }
}

/// Strips brackets, angle brackets, and newlines, and clips to
/// [`MAX_NAME_LEN`] so a crafted display name can't break the
/// `<group_context>` framing or inject extra structure into the prompt.
pub fn sanitize_display_name(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !matches!(c, '[' | ']' | '<' | '>' | '\n')).collect();
    cleaned.trim().chars().take(MAX_NAME_LEN).collect()
}

/// Formats buffered messages as an XML-tagged context block, or an empty
/// string if there are none to show.
pub fn format_for_prompt(messages: &[GroupMessage]) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let mut lines = Vec::with_capacity(messages.len());
    for msg in messages {
        let name = sanitize_display_name(&msg.user_display);
        let text: String = msg.text.chars().take(MAX_MESSAGE_LEN).collect();
        lines.push(format!("  {name}: {text}"));
    }
    format!("<group_context>\n{}\n</group_context>", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, name: &str, text: &str) -> GroupMessage {
        GroupMessage { user_display: name.to_string(), text: text.to_string(), timestamp: Utc::now(), message_id: id.to_string() }
    }

    #[test]
    fn buffer_evicts_oldest_message_once_per_chat_capacity_is_hit() {
        let mut buf = GroupHistoryBuffer::new(2, 10);
        buf.record("chat-1", msg("1", "a", "first"));
        buf.record("chat-1", msg("2", "a", "second"));
        buf.record("chat-1", msg("3", "a", "third"));

        let recent = buf.recent("chat-1", None);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message_id, "2");
        assert_eq!(recent[1].message_id, "3");
    }

    #[test]
    fn buffer_evicts_oldest_chat_once_chat_capacity_is_hit() {
        let mut buf = GroupHistoryBuffer::new(10, 1);
        buf.record("chat-1", msg("1", "a", "hi"));
        buf.record("chat-2", msg("2", "b", "hi"));

        assert!(buf.recent("chat-1", None).is_empty());
        assert_eq!(buf.recent("chat-2", None).len(), 1);
    }

    #[test]
    fn excludes_the_triggering_message_when_asked() {
        let mut buf = GroupHistoryBuffer::new(10, 10);
        buf.record("chat-1", msg("1", "a", "hi"));
        buf.record("chat-1", msg("2", "a", "trigger"));

        let recent = buf.recent("chat-1", Some("2"));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message_id, "1");
    }

    #[test]
    fn sanitizes_brackets_angles_and_newlines_in_display_names() {
        assert_eq!(sanitize_display_name("<script>[hi]\nbye"), "scripthibye");
    }

    #[test]
    fn sanitized_names_are_clipped_to_fifty_chars() {
        let long = "x".repeat(100);
        assert_eq!(sanitize_display_name(&long).len(), 50);
    }

    #[test]
    fn formats_messages_inside_group_context_tags() {
        let messages = vec![msg("1", "Alice", "hello there")];
        let block = format_for_prompt(&messages);
        assert!(block.starts_with("<group_context>\n"));
        assert!(block.ends_with("\n</group_context>"));
        assert!(block.contains("Alice: hello there"));
    }

    #[test]
    fn empty_message_list_formats_to_an_empty_string() {
        assert_eq!(format_for_prompt(&[]), "");
    }
}
