//! HTTP transport for Chat Completions
//!
//! Performs the POST and hands raw fragments to the caller, one per SSE
//! event for streaming responses and one for a buffered body. Decoding is
//! not done here.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::decoder::PayloadDecoder;
use crate::error::TransportError;
use crate::logging::mask_key;
use crate::protocol::{normalize_endpoint, ChatRequest, ErrorEnvelope};
use crate::settings::ChatSettings;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sender side of a turn's fragment stream
pub type FragmentSender = mpsc::Sender<String>;

/// Boundary to the chat-completion service.
///
/// `send` delivers every raw fragment through `fragments`, in arrival order,
/// and returns once the response is fully read. Dropping the future aborts
/// the call.
#[async_trait]
pub trait ChatTransport: Send + Sync + 'static {
    async fn send(
        &self,
        request: ChatRequest,
        fragments: FragmentSender,
    ) -> Result<(), TransportError>;
}

/// reqwest-backed transport for OpenAI-compatible endpoints
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    decoder: PayloadDecoder,
}

impl HttpTransport {
    pub fn new(settings: &ChatSettings) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| TransportError::Connection(format!("build HTTP client: {}", e)))?;

        let endpoint = normalize_endpoint(&settings.endpoint);
        let api_key = settings.api_key.clone().filter(|k| !k.trim().is_empty());
        log::info!(
            "HttpTransport: endpoint={} api_key={}",
            endpoint,
            api_key.as_deref().map(mask_key).unwrap_or_else(|| "<none>".into())
        );

        Ok(Self {
            client,
            endpoint,
            api_key,
            decoder: PayloadDecoder::new(settings.passthrough_model.clone()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(
        &self,
        request: ChatRequest,
        fragments: FragmentSender,
    ) -> Result<(), TransportError> {
        let passthrough = self.decoder.is_passthrough(&request.model);

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .header(CONNECTION, "keep-alive")
            .header(CACHE_CONTROL, "no-cache")
            .header(
                USER_AGENT,
                concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")),
            );

        if !passthrough {
            let key = self.api_key.as_ref().ok_or(TransportError::MissingApiKey)?;
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", key));
        }

        log::info!(
            "HttpTransport: POST model={} stream={} messages={}",
            request.model,
            request.stream,
            request.messages.len()
        );

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match ErrorEnvelope::parse(&body) {
                Some(envelope) => envelope.message(),
                None if body.trim().is_empty() => status.to_string(),
                None => body,
            };
            log::error!("HttpTransport: request failed ({}): {}", status, message);
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if !is_sse || passthrough {
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::Protocol(e.to_string()))?;
            log::debug!("HttpTransport: buffered body, {} bytes", body.len());
            // Receiver gone means the turn was dropped; nothing left to do.
            let _ = fragments.send(body).await;
            return Ok(());
        }

        let mut stream = response.bytes_stream().eventsource();
        let mut events = 0usize;
        while let Some(event) = stream.next().await {
            let event = event.map_err(|e| TransportError::Protocol(e.to_string()))?;
            if event.data.is_empty() {
                continue;
            }
            events += 1;
            if fragments
                .send(format!("data: {}", event.data))
                .await
                .is_err()
            {
                log::debug!("HttpTransport: fragment receiver closed, stopping read");
                break;
            }
        }
        log::debug!("HttpTransport: SSE stream ended after {} events", events);
        Ok(())
    }
}
