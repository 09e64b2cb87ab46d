//! Token estimation utilities.
//!
//! A byte/character heuristic, not a tokenizer. It is used to reserve
//! rate-limit capacity before a request is sent, so it errs on the side of
//! over-counting: a token is taken to be about 3 bytes, and never fewer
//! than one per two characters (CJK text is dense in bytes but not in chars).

use crate::message::Message;

/// Fixed per-message cost for role markers and delimiters.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
pub fn estimate_text_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let by_bytes = text.len().div_ceil(3);
    let by_chars = text.chars().count() / 2;
    by_bytes.max(by_chars).max(1)
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + estimate_text_tokens(&message.content)
}

/// Estimate tokens for a slice of messages. Always at least 1.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum::<usize>().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero() {
        assert_eq!(estimate_text_tokens(""), 0);
    }

    #[test]
    fn short_text_costs_at_least_one() {
        assert_eq!(estimate_text_tokens("a"), 1);
    }

    #[test]
    fn empty_list_is_floored_at_one() {
        assert_eq!(estimate_tokens(&[]), 1);
    }

    #[test]
    fn message_includes_overhead() {
        assert!(estimate_tokens(&[Message::user("")]) >= MESSAGE_OVERHEAD);
        assert!(estimate_tokens(&[Message::user("df -h")]) > MESSAGE_OVERHEAD);
    }

    #[test]
    fn monotonic_in_content_length() {
        let mut previous = 0;
        let mut content = String::new();
        for ch in "lsblk -f /dev/sda1 디스크 용량 부족".chars().cycle().take(200) {
            content.push(ch);
            let estimate = estimate_tokens(&[Message::user(content.clone())]);
            assert!(estimate >= previous, "estimate decreased at {content:?}");
            previous = estimate;
        }
    }

    #[test]
    fn monotonic_in_message_count() {
        let one = estimate_tokens(&[Message::user("mount")]);
        let two = estimate_tokens(&[Message::user("mount"), Message::assistant("")]);
        assert!(two >= one);
    }

    #[test]
    fn multibyte_text_counts_more_than_ascii_of_same_length() {
        let ascii = estimate_text_tokens(&"a".repeat(30));
        let hangul = estimate_text_tokens(&"가".repeat(30));
        assert!(hangul > ascii);
    }
}
