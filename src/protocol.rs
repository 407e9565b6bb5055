//! Chat Completions wire types
//!
//! Request body sent to the endpoint and the small set of response shapes we
//! read with typed structs. Fragment decoding with all its fallbacks lives in
//! [`crate::decoder`].
//!
//! # Protocol Overview
//!
//! 1. `POST <base>/v1/chat/completions` with a [`ChatRequest`] body
//! 2. Streaming upstreams answer with `data: <json>\n\n` frames ended by `data: [DONE]`
//! 3. Buffered upstreams answer with one chat-completion JSON document
//! 4. Failures come back as `{"error": ...}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Path every endpoint is normalised to end with
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// SSE end-of-stream sentinel
pub const DONE_SENTINEL: &str = "[DONE]";

/// Request body for the Chat Completions API.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
}

/// Chat message structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Error envelope from the service.
///
/// `error` is usually an object with a `message`, but some compatible servers
/// send a bare string, so it stays untyped.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: Value,
}

impl ErrorEnvelope {
    /// Human-readable message for the envelope
    pub fn message(&self) -> String {
        match &self.error {
            Value::String(s) => s.clone(),
            Value::Object(map) => match map.get("message").and_then(Value::as_str) {
                Some(msg) if !msg.is_empty() => msg.to_string(),
                _ => self.error.to_string(),
            },
            Value::Null => "Unknown error".to_string(),
            other => other.to_string(),
        }
    }

    /// Parse `text` as an error envelope, if it is one
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str::<Self>(text.trim()).ok()
    }
}

/// Normalise `url` so it ends with [`CHAT_COMPLETIONS_PATH`].
pub fn normalize_endpoint(url: &str) -> String {
    let url = url.trim();
    if url.ends_with(CHAT_COMPLETIONS_PATH) {
        return url.to_string();
    }

    let normalized = if url.ends_with("/v1") {
        format!("{}/chat/completions", url)
    } else if url.ends_with("/v1/") {
        format!("{}chat/completions", url)
    } else if url.ends_with('/') {
        format!("{}v1/chat/completions", url)
    } else {
        format!("{}{}", url, CHAT_COMPLETIONS_PATH)
    };

    log::debug!("Adjusted endpoint URL to: {}", normalized);
    normalized
}
