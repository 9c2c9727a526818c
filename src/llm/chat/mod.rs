pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use log::{ debug, warn };
use reqwest::{ header::HeaderMap, Client as HttpClient, RequestBuilder, Response };
use serde::{ de::DeserializeOwned, Deserialize, Serialize };
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use self::anthropic::AnthropicChatClient;
use self::gemini::GeminiChatClient;
use self::ollama::OllamaClient;
use self::openai::OpenAICompatibleClient;
use super::{ Provider, ProviderConfig };
use crate::models::chat::Role;

const MAX_ERROR_BODY: usize = 512;

/// Failure of a single vendor call.
#[derive(Debug, Error, PartialEq)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited by provider (HTTP {status})")]
    RateLimited {
        status: u16,
    },
    #[error("HTTP {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("provider returned an empty response")]
    EmptyResponse,
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 429 {
            return ProviderError::RateLimited { status };
        }
        let mut body = body;
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        ProviderError::Status { status, body }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if let Some(status) = err.status() {
            ProviderError::from_status(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Decode(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// Provider-agnostic request handed to a [`ChatClient`].
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<PromptMessage>,
    /// Overrides the client's configured model.
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError>;

    /// Clients without a streaming endpoint relay the full response as one chunk.
    async fn stream_completion(&self, request: &CompletionRequest) -> Result<TokenStream, ProviderError> {
        let response = self.complete(request).await?;
        let content = response.content;
        Ok(Box::pin(futures::stream::once(async move { Ok(content) })))
    }

    fn provider(&self) -> Provider;
    fn model(&self) -> String;
}

pub fn new_client(config: &ProviderConfig) -> Result<Arc<dyn ChatClient>, ProviderError> {
    if !config.is_configured() {
        return Err(
            ProviderError::Config(
                format!("{} is not set for provider {}", config.credential_env(), config.provider)
            )
        );
    }
    let client: Arc<dyn ChatClient> = match config.provider {
        | Provider::OpenAI
        | Provider::XAI
        | Provider::DeepSeek
        | Provider::Groq
        | Provider::Mistral => {
            let specific_client = OpenAICompatibleClient::from_config(config)?;
            Arc::new(specific_client)
        }
        Provider::Anthropic => {
            let specific_client = AnthropicChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        Provider::Google => {
            let specific_client = GeminiChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        Provider::Ollama => {
            let specific_client = OllamaClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

pub(crate) fn build_http(headers: HeaderMap) -> Result<HttpClient, ProviderError> {
    HttpClient::builder()
        .default_headers(headers)
        .build()
        .map_err(|e| ProviderError::Config(e.to_string()))
}

/// Sends the request and turns non-2xx statuses into [`ProviderError`]s.
pub(crate) async fn send_checked(builder: RequestBuilder) -> Result<Response, ProviderError> {
    let resp = builder.send().await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status.as_u16(), body))
}

/// Payload of a server-sent-events `data:` line, skipping the `[DONE]` sentinel.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Error object a vendor embeds in a stream that already answered HTTP 200.
fn stream_error(value: &Value) -> Option<ProviderError> {
    let error = value.get("error").filter(|e| !e.is_null())?;
    let message = match error {
        Value::String(s) => s.clone(),
        other =>
            other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
    };
    let status = error
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .or_else(|| {
            match error.get("type").and_then(Value::as_str) {
                Some("rate_limit_error") => Some(429),
                Some("overloaded_error") => Some(529),
                Some("api_error") => Some(500),
                _ => None,
            }
        })
        .unwrap_or(502);
    Some(ProviderError::from_status(status, message))
}

/// Decodes one streamed JSON chunk. Vendor error objects become `Err`;
/// chunks that do not decode are skipped.
pub(crate) fn stream_event<T: DeserializeOwned>(data: &str) -> Option<Result<T, ProviderError>> {
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            debug!("Skipping unparsable stream chunk: {} ({})", data, e);
            return None;
        }
    };
    if let Some(err) = stream_error(&value) {
        return Some(Err(err));
    }
    match serde_json::from_value(value) {
        Ok(event) => Some(Ok(event)),
        Err(e) => {
            debug!("Skipping unexpected stream chunk: {} ({})", data, e);
            None
        }
    }
}

/// Turns one body line into a token, an error, or nothing.
pub(crate) type LineParser = fn(&str) -> Option<Result<String, ProviderError>>;

/// Streams a line-oriented response body (SSE or NDJSON) through `line_parser`.
///
/// The request is issued on a background task; dropping the returned stream
/// stops the task at its next await point. The first error ends the stream.
pub(crate) fn http_line_stream(builder: RequestBuilder, line_parser: LineParser) -> TokenStream {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let resp = match send_checked(builder).await {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        let mut bytes = resp.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();

        loop {
            let chunk = tokio::select! {
                _ = tx.closed() => return,
                chunk = bytes.next() => chunk,
            };
            match chunk {
                Some(Ok(buf)) => {
                    pending.extend_from_slice(&buf);
                    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                        let line_bytes: Vec<u8> = pending.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line_bytes);
                        match line_parser(line.trim_end()) {
                            Some(Ok(tok)) => {
                                if tx.send(Ok(tok)).await.is_err() {
                                    return;
                                }
                            }
                            Some(Err(e)) => {
                                warn!("Provider reported an error mid-stream: {}", e);
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                            None => {}
                        }
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
                None => break,
            }
        }

        if !pending.is_empty() {
            let line = String::from_utf8_lossy(&pending);
            if let Some(item) = line_parser(line.trim_end()) {
                let _ = tx.send(item).await;
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        assert!(matches!(ProviderError::from_status(429, "slow down".into()), ProviderError::RateLimited {
            status: 429,
        }));
        match ProviderError::from_status(500, "x".repeat(2000)) {
            ProviderError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), MAX_ERROR_BODY);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn sse_data_skips_sentinels() {
        assert_eq!(sse_data("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_data("data: [DONE]"), None);
        assert_eq!(sse_data("event: ping"), None);
        assert_eq!(sse_data("data:"), None);
    }

    #[test]
    fn unconfigured_provider_has_no_client() {
        let config = ProviderConfig::new(Provider::OpenAI);
        assert!(matches!(new_client(&config), Err(ProviderError::Config(_))));
    }
}
