//! Error taxonomy for a chat turn
//!
//! - [`TransportError`]: connection or protocol failure. Terminal for the turn, never retried.
//! - [`DecodeError::Upstream`]: well-formed error envelope from the service. Terminal.
//! - [`DecodeError::Malformed`]: one unreadable sub-document. Logged and skipped.
//!
//! Empty content is not an error here; the state machine decides whether a
//! fallback reply is owed.

use thiserror::Error;

/// Errors raised by the transport before or while streaming the response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// API key not configured (and the model is not the pass-through variant)
    #[error("API key not configured. Set OPENAI_API_KEY environment variable.")]
    MissingApiKey,
    /// Failed to reach the endpoint
    #[error("Connection error: {0}")]
    Connection(String),
    /// Endpoint answered with a non-success status
    #[error("Request error ({status}): {message}")]
    Status { status: u16, message: String },
    /// Body could not be read as text/SSE
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors raised while decoding one fragment
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The service sent an `{"error": ...}` envelope
    #[error("API error: {0}")]
    Upstream(String),
    /// A sub-document was not valid JSON or had no usable shape
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl DecodeError {
    /// Whether this error ends the turn
    pub fn is_terminal(&self) -> bool {
        matches!(self, DecodeError::Upstream(_))
    }
}

/// Tag attached to a final segment whose text is an error message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyErrorKind {
    Transport,
    Upstream,
}

/// Errors from persisting settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialize settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from talking to a stopped session loop
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("chat session loop has stopped")]
    Closed,
}
