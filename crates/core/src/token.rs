//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token, accurate
//! within ~10% for BPE tokenizers on English text. The tokenizer is a
//! deployment detail; everything in the runtime only relies on the
//! `tokens(text) -> usize` contract, so a real BPE implementation can be
//! swapped in here without touching callers.

use crate::message::{MessageContent, ToolCall};

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Per-message overhead for role name, delimiters, and formatting markers
/// in the API wire format.
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate tokens for a message's content plus its tool calls.
pub fn message_tokens(content: &MessageContent, tool_calls: &[ToolCall]) -> usize {
    let mut tokens = MESSAGE_OVERHEAD + estimate_tokens(&content.as_text());
    for call in tool_calls {
        let serialized = serde_json::to_string(&call.to_value()).unwrap_or_default();
        tokens += estimate_tokens(&serialized);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn hundred_chars() {
        let text = "a".repeat(100);
        assert_eq!(estimate_tokens(&text), 25);
    }

    #[test]
    fn message_includes_overhead() {
        // 4 chars → 1 token + 4 overhead = 5
        let content = MessageContent::from("test");
        assert_eq!(message_tokens(&content, &[]), 5);
    }

    #[test]
    fn tool_calls_count_toward_tokens() {
        let content = MessageContent::from("test");
        let bare = message_tokens(&content, &[]);
        let call = ToolCall::function("calculator", json!({"expression": "2+2"}));
        assert!(message_tokens(&content, &[call]) > bare);
    }
}
