//! Stuck-loop detection.
//!
//! The agent is stuck when its latest assistant content closely repeats
//! enough of its earlier assistant messages. Similarity is the longest
//! common subsequence over bytes, compared against 60% of the latest
//! content's length. Pure functions of the message window and the
//! threshold.

use std::collections::VecDeque;

use mentis_core::message::{Message, Role};

/// Classic O(n·m) longest-common-subsequence length over bytes.
pub fn lcs_length(a: &[u8], b: &[u8]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for &byte_a in a {
        for (j, &byte_b) in b.iter().enumerate() {
            current[j + 1] = if byte_a == byte_b {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Share of the latest content an earlier message must reproduce to count
/// as a duplicate.
const DUPLICATE_SHARE: f64 = 0.6;

/// True when at least `duplicate_threshold` earlier assistant messages
/// share more than 60% LCS with the latest assistant content.
pub fn is_stuck(messages: &VecDeque<Message>, duplicate_threshold: usize) -> bool {
    if messages.len() < duplicate_threshold {
        return false;
    }
    let Some(last) = messages.back() else {
        return false;
    };
    if last.role != Role::Assistant || last.content.is_empty() {
        return false;
    }

    let last_text = last.text();
    let duplicate_lcs = (DUPLICATE_SHARE * last_text.len() as f64) as usize;

    let mut duplicate_count = 0;
    for message in messages.iter().rev().skip(1) {
        if message.role != Role::Assistant || message.content.is_empty() {
            continue;
        }
        if lcs_length(message.text().as_bytes(), last_text.as_bytes()) > duplicate_lcs {
            duplicate_count += 1;
            if duplicate_count >= duplicate_threshold {
                break;
            }
        }
    }
    duplicate_count >= duplicate_threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(texts: &[(&str, Role)]) -> VecDeque<Message> {
        texts
            .iter()
            .map(|(text, role)| match role {
                Role::User => Message::user(*text),
                Role::Assistant => Message::assistant(*text),
                Role::System => Message::system(*text),
                Role::Tool => Message::tool(*text, "call_0", "t"),
            })
            .collect()
    }

    #[test]
    fn lcs_basics() {
        assert_eq!(lcs_length(b"", b"abc"), 0);
        assert_eq!(lcs_length(b"abc", b"abc"), 3);
        assert_eq!(lcs_length(b"axbxc", b"abc"), 3);
        assert_eq!(lcs_length(b"abc", b"xyz"), 0);
    }

    #[test]
    fn near_duplicates_trigger_at_threshold() {
        // Three assistant messages sharing a long common core with the
        // last one; threshold 2 is met.
        let messages = window(&[
            ("AAAAAA", Role::Assistant),
            ("B", Role::Assistant),
            ("AAAAAAxxx", Role::Assistant),
            ("AAAAAAyyy", Role::Assistant),
        ]);
        assert!(is_stuck(&messages, 2));
    }

    #[test]
    fn distinct_content_is_not_stuck() {
        let messages = window(&[
            ("first answer about apples", Role::Assistant),
            ("now discussing oranges", Role::Assistant),
            ("finally some bananas here", Role::Assistant),
        ]);
        assert!(!is_stuck(&messages, 2));
    }

    #[test]
    fn non_assistant_tail_is_ignored() {
        let messages = window(&[
            ("repeat repeat repeat", Role::Assistant),
            ("repeat repeat repeat", Role::Assistant),
            ("a question", Role::User),
        ]);
        assert!(!is_stuck(&messages, 2));
    }

    #[test]
    fn identical_inputs_yield_identical_outputs() {
        let messages = window(&[
            ("same text here", Role::Assistant),
            ("same text here", Role::Assistant),
            ("same text here", Role::Assistant),
        ]);
        let first = is_stuck(&messages, 2);
        let second = is_stuck(&messages, 2);
        assert_eq!(first, second);
        assert!(first);
    }

    #[test]
    fn short_windows_are_never_stuck() {
        let messages = window(&[("only one", Role::Assistant)]);
        assert!(!is_stuck(&messages, 2));
    }
}
