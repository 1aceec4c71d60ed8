//! Ollama `/api/chat` streaming client.

use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::config::BackendConfig;
use crate::domain::errors::{RelayError, RelayResult};
use crate::domain::turn::Turn;
use crate::llm::ndjson::decode_ndjson;
use crate::llm::{CompletionBackend, ReplyStream};

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Turn>,
    stream: bool,
}

/// Async Ollama client streaming chat completions.
#[derive(Clone)]
pub struct OllamaChatClient {
    client: Client,
    chat_url: String,
    config: BackendConfig,
}

impl OllamaChatClient {
    /// Build a client for the configured backend.
    ///
    /// No total request timeout is set: replies may stream for a long time,
    /// and stalls are bounded by the idle timeout instead.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> RelayResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            client,
            chat_url: format!("{}/api/chat", config.base_url.trim_end_matches('/')),
            config: config.clone(),
        })
    }

    /// Endpoint receiving chat requests.
    #[must_use]
    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    /// Open the response stream, retrying connection failures with backoff.
    async fn open(&self, request: &ChatRequest) -> RelayResult<reqwest::Response> {
        let mut attempt = 0_u32;
        loop {
            match self.try_open(request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry_delay(attempt);
                    warn!(attempt, ?delay, error = %err, "Retrying backend stream open");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_open(&self, request: &ChatRequest) -> RelayResult<reqwest::Response> {
        let response = self
            .client
            .post(&self.chat_url)
            .json(request)
            .send()
            .await
            .map_err(|err| RelayError::BackendUnavailable(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::BackendUnavailable(format!(
                "http status {}: {body}",
                status.as_u16()
            )));
        }

        Ok(response)
    }
}

impl CompletionBackend for OllamaChatClient {
    fn send(&self, transcript: &[Turn]) -> ReplyStream {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: transcript.to_vec(),
            stream: true,
        };
        let this = self.clone();

        Box::pin(async_stream::try_stream! {
            debug!(model = %request.model, turns = request.messages.len(), "Opening backend stream");
            let response = this.open(&request).await?;
            let mut replies = decode_ndjson(
                response.bytes_stream(),
                this.config.idle_timeout(),
                this.config.max_line_bytes,
            );
            while let Some(reply) = replies.next().await {
                yield reply?;
            }
        })
    }
}
