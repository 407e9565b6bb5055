//! Fragment decoding for chat-completion responses
//!
//! Turns one raw fragment (an SSE frame, a batch of `data:` lines, or a whole
//! buffered body) into zero or more text deltas plus a stream-end flag.
//!
//! # Decode Order
//!
//! 1. `[DONE]` sentinel: stream end, no delta
//! 2. `{"error": ...}` envelope: [`DecodeError::Upstream`], terminal for the turn
//! 3. Whole JSON document: one (possibly large) delta, segmented downstream
//! 4. `data:` sub-documents: field lookup with fallbacks, one delta per match
//! 5. Pass-through model: raw text as a single delta, always stream end
//!
//! A malformed sub-document is logged and skipped. A fragment with no usable
//! delta is not an error.

use serde_json::Value;

use crate::error::DecodeError;
use crate::protocol::{ErrorEnvelope, DONE_SENTINEL};

/// Model id of the pass-through variant when none is configured
pub const DEFAULT_PASSTHROUGH_MODEL: &str = "fay";

/// Output of decoding one fragment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Extracted text, in order, before think filtering and segmentation
    pub deltas: Vec<String>,
    /// `[DONE]` seen (or the model never streams)
    pub stream_end: bool,
    /// A sub-document reported `finish_reason == "stop"`
    pub finished: bool,
    /// Sub-documents skipped as malformed
    pub malformed: usize,
}

impl Decoded {
    /// Whether at least one delta carries text
    pub fn has_content(&self) -> bool {
        self.deltas.iter().any(|d| !d.is_empty())
    }
}

/// Decodes fragments for a configured pass-through model id
#[derive(Debug, Clone)]
pub struct PayloadDecoder {
    passthrough_model: String,
}

impl Default for PayloadDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_PASSTHROUGH_MODEL)
    }
}

impl PayloadDecoder {
    pub fn new(passthrough_model: impl Into<String>) -> Self {
        Self {
            passthrough_model: passthrough_model.into(),
        }
    }

    /// Whether `model` is the pass-through variant (case-insensitive)
    pub fn is_passthrough(&self, model: &str) -> bool {
        !self.passthrough_model.is_empty() && model.eq_ignore_ascii_case(&self.passthrough_model)
    }

    /// Decode one fragment for `model`.
    pub fn decode(&self, fragment: &str, model: &str) -> Result<Decoded, DecodeError> {
        if self.is_passthrough(model) {
            return decode_passthrough(fragment);
        }

        let trimmed = fragment.trim();
        if trimmed.is_empty() {
            return Ok(Decoded::default());
        }

        let mut decoded = Decoded::default();
        for doc in sub_documents(trimmed) {
            if doc == DONE_SENTINEL {
                decoded.stream_end = true;
                break;
            }

            let json: Value = match serde_json::from_str(doc) {
                Ok(json) => json,
                Err(e) => {
                    log::warn!("Decoder: skipping malformed sub-document ({}): {}", e, doc);
                    decoded.malformed += 1;
                    continue;
                }
            };

            if let Some(message) = error_message(&json) {
                log::error!("Decoder: upstream error envelope: {}", message);
                return Err(DecodeError::Upstream(message));
            }

            match extract_content(&json) {
                Some(text) => decoded.deltas.push(text),
                None => log::debug!("Decoder: no content field in sub-document: {}", doc),
            }

            if finish_reason(&json) == Some("stop") {
                decoded.finished = true;
                break;
            }
        }

        Ok(decoded)
    }
}

/// Pass-through responses are never field-shaped for certain. Probe a few
/// JSON shapes, then fall back to the raw text.
fn decode_passthrough(fragment: &str) -> Result<Decoded, DecodeError> {
    let mut decoded = Decoded {
        stream_end: true,
        ..Default::default()
    };

    let trimmed = fragment.trim();
    if trimmed.is_empty() {
        log::warn!("Decoder: pass-through response is empty");
        return Ok(decoded);
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(json) => {
            if let Some(message) = error_message(&json) {
                log::error!("Decoder: pass-through upstream error: {}", message);
                return Err(DecodeError::Upstream(message));
            }
            match probe_passthrough(&json) {
                Some(text) => decoded.deltas.push(text),
                None => {
                    log::warn!("Decoder: no content in pass-through JSON, using raw text");
                    decoded.deltas.push(fragment.to_string());
                }
            }
        }
        Err(_) => decoded.deltas.push(fragment.to_string()),
    }

    Ok(decoded)
}

fn probe_passthrough(json: &Value) -> Option<String> {
    [
        "/choices/0/message/content",
        "/choices/0/text",
        "/choices/0/delta/content",
        "/message/content",
        "/content",
        "/text",
    ]
    .iter()
    .find_map(|pointer| non_empty_str(json.pointer(pointer)))
}

/// Split a fragment into JSON sub-documents.
///
/// A fragment without any `data:` line is a single document. Otherwise each
/// `data:` line opens a sub-document and SSE comment/field lines are dropped.
fn sub_documents(fragment: &str) -> Vec<&str> {
    let has_data_lines = fragment
        .lines()
        .any(|line| line.trim_start().starts_with("data:"));
    if !has_data_lines {
        return vec![fragment];
    }

    fragment
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix("data:"))
        .map(str::trim)
        .filter(|doc| !doc.is_empty())
        .collect()
}

fn error_message(json: &Value) -> Option<String> {
    let error = json.get("error")?;
    if error.is_null() {
        return None;
    }
    serde_json::from_value::<ErrorEnvelope>(json.clone())
        .ok()
        .map(|env| env.message())
}

fn finish_reason(json: &Value) -> Option<&str> {
    json.pointer("/choices/0/finish_reason")
        .and_then(Value::as_str)
}

/// Field lookup in fallback order; the first non-empty match wins.
fn extract_content(json: &Value) -> Option<String> {
    if let Some(choice) = json.pointer("/choices/0") {
        if let Some(text) = non_empty_str(choice.pointer("/message/content")) {
            return Some(text);
        }
        let candidate = choice
            .get("delta")
            .or_else(|| choice.get("text"))
            .or_else(|| choice.get("content"));
        if let Some(text) = candidate.and_then(string_or_content) {
            return Some(text);
        }
    }

    json.get("content")
        .and_then(string_or_content)
        .or_else(|| json.get("message").and_then(string_or_content))
}

/// A plain string, or an object's `content` string
fn string_or_content(value: &Value) -> Option<String> {
    match value {
        Value::String(_) => non_empty_str(Some(value)),
        Value::Object(_) => non_empty_str(value.get("content")),
        _ => None,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode(fragment: &str) -> Result<Decoded, DecodeError> {
        PayloadDecoder::default().decode(fragment, "gpt-4o-mini")
    }

    #[test]
    fn test_done_sentinel() {
        let d = decode("data: [DONE]").unwrap();
        assert!(d.stream_end);
        assert!(d.deltas.is_empty());

        let d = decode("[DONE]").unwrap();
        assert!(d.stream_end);
    }

    #[test]
    fn test_delta_content_frame() {
        let d = decode(r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#).unwrap();
        assert_eq!(d.deltas, vec!["Hello"]);
        assert!(!d.stream_end);
    }

    #[test]
    fn test_bare_sse_payload_without_prefix() {
        let d = decode(r#"{"choices":[{"delta":{"content":", world."}}]}"#).unwrap();
        assert_eq!(d.deltas, vec![", world."]);
    }

    #[test]
    fn test_leading_whitespace_in_delta_is_kept() {
        let d = decode(r#"data: {"choices":[{"delta":{"content":" world"}}]}"#).unwrap();
        assert_eq!(d.deltas, vec![" world"]);
    }

    #[test]
    fn test_full_document() {
        let d = decode(
            r#"{"choices":[{"message":{"role":"assistant","content":"<think>r</think>Visible reply."}}]}"#,
        )
        .unwrap();
        assert_eq!(d.deltas, vec!["<think>r</think>Visible reply."]);
    }

    #[test]
    fn test_multiple_sub_documents_in_one_fragment() {
        let fragment = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"B\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"C\"}}]}\n\n",
        );
        let d = decode(fragment).unwrap();
        assert_eq!(d.deltas, vec!["A", "B"]);
        assert!(d.stream_end);
    }

    #[test]
    fn test_finish_reason_stop_ends_fragment_processing() {
        let fragment = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"end.\"},\"finish_reason\":\"stop\"}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        );
        let d = decode(fragment).unwrap();
        assert_eq!(d.deltas, vec!["end."]);
        assert!(d.finished);
        assert!(!d.stream_end);
    }

    #[test]
    fn test_field_fallbacks() {
        let cases = [
            (r#"{"choices":[{"text":"t"}]}"#, "t"),
            (r#"{"choices":[{"content":"c"}]}"#, "c"),
            (r#"{"choices":[{"delta":"s"}]}"#, "s"),
            (r#"{"choices":[{"content":{"content":"nested"}}]}"#, "nested"),
            (r#"{"content":"top"}"#, "top"),
            (r#"{"message":"msg"}"#, "msg"),
            (r#"{"message":{"content":"obj"}}"#, "obj"),
            (r#"{"choices":[],"content":"empty choices"}"#, "empty choices"),
        ];
        for (input, expected) in cases {
            let d = decode(&format!("data: {input}")).unwrap();
            assert_eq!(d.deltas, vec![expected.to_string()], "input: {input}");
        }
    }

    #[test]
    fn test_message_content_beats_delta() {
        let d = decode(r#"data: {"choices":[{"message":{"content":"m"},"delta":{"content":"d"}}]}"#)
            .unwrap();
        assert_eq!(d.deltas, vec!["m"]);
    }

    #[test]
    fn test_role_only_delta_is_skipped() {
        let d = decode(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert!(d.deltas.is_empty());
        assert_eq!(d.malformed, 0);
    }

    #[test]
    fn test_malformed_sub_document_is_skipped() {
        let fragment = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"next\"}}]}\n",
        );
        let d = decode(fragment).unwrap();
        assert_eq!(d.deltas, vec!["next"]);
        assert_eq!(d.malformed, 1);
    }

    #[test]
    fn test_error_envelope_is_upstream_error() {
        let err = decode(r#"{"error":{"message":"quota exceeded"}}"#).unwrap_err();
        assert_eq!(err, DecodeError::Upstream("quota exceeded".to_string()));

        let err = decode(r#"data: {"error":"bad model"}"#).unwrap_err();
        assert_eq!(err, DecodeError::Upstream("bad model".to_string()));
    }

    #[test]
    fn test_null_error_field_is_not_an_error() {
        let d = decode(r#"data: {"error":null,"choices":[{"delta":{"content":"x"}}]}"#).unwrap();
        assert_eq!(d.deltas, vec!["x"]);

        let d = decode(r#"{"error":null,"choices":[{"message":{"content":"y"}}]}"#).unwrap();
        assert_eq!(d.deltas, vec!["y"]);
    }

    #[test]
    fn test_content_mentioning_error_is_not_an_error() {
        let d = decode(r#"data: {"choices":[{"delta":{"content":"no error here"}}]}"#).unwrap();
        assert_eq!(d.deltas, vec!["no error here"]);
    }

    #[test]
    fn test_sse_comment_and_event_lines_ignored() {
        let fragment = ": keep-alive\nevent: message\ndata: {\"content\":\"x\"}\n";
        let d = decode(fragment).unwrap();
        assert_eq!(d.deltas, vec!["x"]);
    }

    #[test]
    fn test_empty_fragment() {
        assert_eq!(decode("   ").unwrap(), Decoded::default());
    }

    #[test]
    fn test_passthrough_model_is_case_insensitive() {
        let decoder = PayloadDecoder::default();
        assert!(decoder.is_passthrough("fay"));
        assert!(decoder.is_passthrough("FAY"));
        assert!(!decoder.is_passthrough("gpt-4o"));
    }

    #[test]
    fn test_passthrough_raw_text() {
        let d = PayloadDecoder::default()
            .decode("plain reply text", "Fay")
            .unwrap();
        assert_eq!(d.deltas, vec!["plain reply text"]);
        assert!(d.stream_end);
    }

    #[test]
    fn test_passthrough_json_probe() {
        let d = PayloadDecoder::default()
            .decode(r#"{"choices":[{"text":"probed"}]}"#, "fay")
            .unwrap();
        assert_eq!(d.deltas, vec!["probed"]);
        assert!(d.stream_end);
    }

    #[test]
    fn test_passthrough_empty() {
        let d = PayloadDecoder::default().decode("", "fay").unwrap();
        assert!(d.deltas.is_empty());
        assert!(d.stream_end);
    }

    #[test]
    fn test_passthrough_error_envelope() {
        let err = PayloadDecoder::default()
            .decode(r#"{"error":"down"}"#, "fay")
            .unwrap_err();
        assert!(err.is_terminal());
    }
}
