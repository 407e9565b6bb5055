//! Removal of inline `<think>...</think>` reasoning spans
//!
//! Reasoning models may prefix the visible reply with a think span. Nothing
//! inside one may ever reach a consumer.

const OPEN: &str = "<think>";
const CLOSE: &str = "</think>";

/// Remove every `<think>...</think>` span from `text`.
///
/// An unterminated `<think>` truncates the text at the tag and stops the scan.
/// If only whitespace remains the result is empty: "no visible content",
/// which is for the caller to handle.
pub fn filter(text: &str) -> String {
    if !text.contains(OPEN) {
        return text.to_string();
    }

    let mut result = text.to_string();
    while let Some(start) = result.find(OPEN) {
        match result[start..].find(CLOSE) {
            Some(rel_end) => {
                result.replace_range(start..start + rel_end + CLOSE.len(), "");
            }
            None => {
                result.truncate(start);
                break;
            }
        }
    }

    log::debug!(
        "ThinkFilter: stripped think spans ({} -> {} bytes)",
        text.len(),
        result.len()
    );

    if result.trim().is_empty() {
        return String::new();
    }
    result
}

/// Streaming variant of [`filter`] for the deltas of one turn.
///
/// An unterminated span is carried from one delta to the next, so a
/// reasoning block split across several deltas is dropped as a whole. A tail
/// that could be the start of a tag (`"<thi"`, `"</th"`) is held back until
/// the next delta decides it. Unlike [`filter`], whitespace-only output is
/// kept: inside a stream it is the gap between two words.
#[derive(Debug, Clone, Default)]
pub struct StreamingFilter {
    in_think: bool,
    carry: String,
}

impl StreamingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inside an unterminated `<think>` span
    pub fn in_think(&self) -> bool {
        self.in_think
    }

    /// Feed one delta and return the newly visible text.
    pub fn push(&mut self, delta: &str) -> String {
        let mut input = std::mem::take(&mut self.carry);
        input.push_str(delta);

        let mut rest = input.as_str();
        let mut visible = String::new();
        loop {
            let tag = if self.in_think { CLOSE } else { OPEN };
            match rest.find(tag) {
                Some(pos) => {
                    if !self.in_think {
                        visible.push_str(&rest[..pos]);
                    }
                    rest = &rest[pos + tag.len()..];
                    self.in_think = !self.in_think;
                }
                None => {
                    let (head, tail) = rest.split_at(rest.len() - partial_tag_len(rest, tag));
                    if !self.in_think {
                        visible.push_str(head);
                    }
                    self.carry = tail.to_string();
                    return visible;
                }
            }
        }
    }

    /// End of stream: release a held-back tail unless a span is still open.
    pub fn flush(&mut self) -> String {
        let tail = std::mem::take(&mut self.carry);
        if self.in_think {
            return String::new();
        }
        tail
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
///
/// Tags are ASCII, so the split point is always a char boundary.
fn partial_tag_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&n| text.ends_with(&tag[..n]))
        .unwrap_or(0)
}

/// Whether `text` holds an opening `<think>` tag
pub fn has_think_tag(text: &str) -> bool {
    text.contains(OPEN)
}
