//! Outgoing-message splitting to fit a platform's message-length limit
//! (§4.5 "Response splitting"): paragraph boundaries first, then the
//! latest newline within the limit, then a hard cut.

pub fn split_response(text: &str, max_len: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        if current.is_empty() {
            current = paragraph.to_string();
        } else if current.chars().count() + paragraph.chars().count() + 2 <= max_len {
            current.push_str("\n\n");
            current.push_str(paragraph);
        } else {
            chunks.push(current.trim().to_string());
            current = paragraph.to_string();
        }
    }

    if !current.is_empty() {
        while current.chars().count() > max_len {
            let split_at = last_newline_within(&current, max_len).unwrap_or(max_len);
            let (head, tail) = split_at_char(&current, split_at);
            chunks.push(head.trim().to_string());
            current = tail.trim_start().to_string();
        }
        if !current.trim().is_empty() {
            chunks.push(current.trim().to_string());
        }
    }

    chunks
}

fn last_newline_within(text: &str, max_chars: usize) -> Option<usize> {
    text.chars().take(max_chars).collect::<String>().rfind('\n').map(|byte_idx| {
        text[..byte_idx].chars().count()
    })
}

/// Splits `text` at the `char_idx`-th character boundary.
fn split_at_char(text: &str, char_idx: usize) -> (&str, &str) {
    match text.char_indices().nth(char_idx) {
        Some((byte_idx, _)) => text.split_at(byte_idx),
        None => (text, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_returned_whole() {
        assert_eq!(split_response("hello", 100), vec!["hello".to_string()]);
    }

    #[test]
    fn empty_text_splits_to_nothing() {
        assert!(split_response("", 100).is_empty());
    }

    #[test]
    fn splits_on_paragraph_boundaries_when_they_fit() {
        let text = "first paragraph\n\nsecond paragraph\n\nthird paragraph";
        let chunks = split_response(text, 20);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20 || c.lines().count() == 1));
        assert!(chunks.len() > 1);
        assert_eq!(chunks.join("\n\n").replace("\n\n\n\n", "\n\n"), chunks.join("\n\n"));
    }

    #[test]
    fn oversized_single_paragraph_falls_back_to_newline_splitting() {
        let text = format!("{}\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = split_response(&text, 35);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 35));
    }

    #[test]
    fn oversized_paragraph_with_no_newlines_hard_cuts() {
        let text = "x".repeat(100);
        let chunks = split_response(&text, 30);
        assert!(chunks.iter().all(|c| c.chars().count() <= 30));
        assert_eq!(chunks.join(""), text);
    }
}
