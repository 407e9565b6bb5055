//! Punctuation-aligned segmentation for progressive display and narration
//!
//! A single left-to-right pass over characters. A chunk closes on a boundary
//! character (kept in the chunk), or is force-closed once it holds `max_len`
//! characters. Where these breaks fall decides narration pacing, so the rule
//! is part of the contract.

/// Sentence and clause punctuation, Latin and full-width.
pub const BOUNDARY_CHARS: &[char] = &[
    '；', ';', '。', ':', '：', '！', '!', '?', '？', ',', '，',
];

/// Maximum characters in a chunk closed without a boundary.
pub const MAX_SEGMENT_CHARS: usize = 30;

/// Result of one pass: closed chunks plus the unclosed tail.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Split<'a> {
    pub closed: Vec<&'a str>,
    pub remainder: &'a str,
}

/// Split `text` into closed chunks and an unclosed remainder.
///
/// `max_len` counts characters, not bytes, so multi-byte punctuation and CJK
/// text are never cut mid-character. A `max_len` of zero disables the length
/// rule.
pub fn split_closed<'a>(text: &'a str, boundaries: &[char], max_len: usize) -> Split<'a> {
    let mut closed = Vec::new();
    let mut start = 0;
    let mut chars_in_chunk = 0;

    for (idx, ch) in text.char_indices() {
        chars_in_chunk += 1;
        let end = idx + ch.len_utf8();

        if boundaries.contains(&ch) || (max_len > 0 && chars_in_chunk >= max_len) {
            closed.push(&text[start..end]);
            start = end;
            chars_in_chunk = 0;
        }
    }

    Split {
        closed,
        remainder: &text[start..],
    }
}

/// Split `text` into ordered chunks; a trailing remainder becomes the last chunk.
///
/// Concatenating the chunks reproduces `text` exactly.
pub fn segment(text: &str, boundaries: &[char], max_len: usize) -> Vec<String> {
    let split = split_closed(text, boundaries, max_len);
    let mut chunks: Vec<String> = split.closed.iter().map(|c| c.to_string()).collect();
    if !split.remainder.is_empty() {
        chunks.push(split.remainder.to_string());
    }
    chunks
}

/// Whether `chunk` ends on a boundary character.
pub fn ends_on_boundary(chunk: &str, boundaries: &[char]) -> bool {
    chunk.chars().last().is_some_and(|c| boundaries.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seg(text: &str) -> Vec<String> {
        segment(text, BOUNDARY_CHARS, MAX_SEGMENT_CHARS)
    }

    #[test]
    fn test_short_text_without_boundary_is_one_chunk() {
        assert_eq!(seg("Hello there"), vec!["Hello there"]);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(seg("").is_empty());
    }

    #[test]
    fn test_boundary_closes_chunk_including_char() {
        assert_eq!(seg("Hello, world."), vec!["Hello,", " world."]);
    }

    #[test]
    fn test_full_width_boundaries() {
        assert_eq!(
            seg("你好，我是助手。有什么事？"),
            vec!["你好，", "我是助手。", "有什么事？"]
        );
    }

    #[test]
    fn test_length_rule_cuts_at_exactly_max() {
        let text = "a".repeat(65);
        let chunks = seg(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 30);
        assert_eq!(chunks[1].chars().count(), 30);
        assert_eq!(chunks[2].chars().count(), 5);
    }

    #[test]
    fn test_length_rule_counts_chars_not_bytes() {
        let text = "字".repeat(31);
        let split = split_closed(&text, BOUNDARY_CHARS, MAX_SEGMENT_CHARS);
        assert_eq!(split.closed.len(), 1);
        assert_eq!(split.closed[0].chars().count(), 30);
        assert_eq!(split.remainder, "字");
    }

    #[test]
    fn test_single_pass_order_boundary_after_forced_cut() {
        let text = format!("{}!", "b".repeat(32));
        let chunks = seg(&text);
        assert_eq!(chunks, vec!["b".repeat(30), "bb!".to_string()]);
    }

    #[test]
    fn test_boundary_at_max_position() {
        let text = format!("{}!tail", "c".repeat(29));
        let split = split_closed(&text, BOUNDARY_CHARS, MAX_SEGMENT_CHARS);
        assert_eq!(split.closed, vec![format!("{}!", "c".repeat(29)).as_str()]);
        assert_eq!(split.remainder, "tail");
    }

    #[test]
    fn test_concatenation_reconstructs_input() {
        let inputs = [
            "Hello, world. How are you today? I am fine; thanks!",
            "没有标点的很长很长很长很长很长很长很长很长很长很长很长很长很长的句子",
            "mixed: 中文，English! and more",
            ",,,",
        ];
        for input in inputs {
            assert_eq!(seg(input).concat(), input);
        }
    }

    #[test]
    fn test_forced_chunks_are_exactly_max_len() {
        let text = "x".repeat(100) + "," + &"y".repeat(40);
        for chunk in seg(&text) {
            if !ends_on_boundary(&chunk, BOUNDARY_CHARS) {
                assert!(chunk.chars().count() <= MAX_SEGMENT_CHARS);
            }
        }
        let split = split_closed(&text, BOUNDARY_CHARS, MAX_SEGMENT_CHARS);
        for chunk in split.closed {
            if !ends_on_boundary(chunk, BOUNDARY_CHARS) {
                assert_eq!(chunk.chars().count(), MAX_SEGMENT_CHARS);
            }
        }
    }

    #[test]
    fn test_zero_max_len_disables_length_rule() {
        let text = "z".repeat(50);
        let split = split_closed(&text, BOUNDARY_CHARS, 0);
        assert!(split.closed.is_empty());
        assert_eq!(split.remainder.len(), 50);
    }
}
