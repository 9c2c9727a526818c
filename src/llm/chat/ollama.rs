use async_trait::async_trait;
use log::{ info, debug };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };

use super::{
    build_http,
    http_line_stream,
    send_checked,
    stream_event,
    ChatClient,
    CompletionRequest,
    CompletionResponse,
    ProviderError,
    TokenStream,
    TokenUsage,
};
use crate::llm::{ Provider, ProviderConfig };

#[derive(Debug)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    message: Option<ChatResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// One NDJSON object per line; the final `done` line carries no text.
pub(crate) fn parse_ollama_line(line: &str) -> Option<Result<String, ProviderError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match stream_event::<ChatResponse>(line)? {
        Ok(resp) =>
            resp.message
                .map(|m| m.content)
                .filter(|c| !c.is_empty())
                .map(Ok),
        Err(e) => Some(Err(e)),
    }
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, model: Option<String>) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            http: build_http(headers)?,
            base_url: base_url.unwrap_or_else(|| Provider::Ollama.default_base_url().to_string()),
            model: model.unwrap_or_else(|| Provider::Ollama.default_model().to_string()),
            max_tokens: 2048,
            temperature: 0.7,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        if config.provider != Provider::Ollama {
            return Err(ProviderError::Config("Invalid config type for OllamaClient".to_string()));
        }
        let mut client = Self::new(config.base_url.clone(), Some(config.model.clone()))?;
        client.max_tokens = config.max_tokens;
        client.temperature = config.temperature;
        Ok(client)
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> ChatRequest {
        ChatRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: request.messages
                .iter()
                .map(|m| OllamaMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            stream,
            options: OllamaOptions {
                temperature: request.temperature.unwrap_or(self.temperature),
                num_predict: request.max_tokens.unwrap_or(self.max_tokens),
            },
        }
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let req = self.build_request(request, false);
        let model = req.model.clone();

        let resp = send_checked(self.http.post(self.endpoint()).json(&req)).await?
            .json::<ChatResponse>().await?;

        if !resp.done {
            debug!("Ollama returned a non-final response for {}", model);
        }
        let content = resp.message
            .map(|m| m.content)
            .filter(|c| !c.is_empty())
            .ok_or(ProviderError::EmptyResponse)?;

        let usage = match (resp.prompt_eval_count, resp.eval_count) {
            (Some(p), Some(c)) => Some(TokenUsage::new(p, c)),
            _ => None,
        };

        Ok(CompletionResponse {
            content,
            model: resp.model.unwrap_or(model),
            usage,
            finish_reason: resp.done_reason,
        })
    }

    async fn stream_completion(&self, request: &CompletionRequest) -> Result<TokenStream, ProviderError> {
        let req = self.build_request(request, true);
        info!("Starting Ollama stream request to {}", self.base_url);
        Ok(http_line_stream(self.http.post(self.endpoint()).json(&req), parse_ollama_line))
    }

    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ndjson_lines() {
        let line = r#"{"model":"llama3.1","message":{"role":"assistant","content":"Hi"},"done":false}"#;
        assert_eq!(parse_ollama_line(line), Some(Ok("Hi".to_string())));
        let done =
            r#"{"model":"llama3.1","message":{"role":"assistant","content":""},"done":true,"eval_count":3}"#;
        assert_eq!(parse_ollama_line(done), None);
        assert_eq!(parse_ollama_line("not json"), None);
    }

    #[test]
    fn error_line_ends_the_stream() {
        let line = r#"{"error":"model runner has unexpectedly stopped"}"#;
        assert_eq!(
            parse_ollama_line(line),
            Some(
                Err(ProviderError::Status {
                    status: 502,
                    body: "model runner has unexpectedly stopped".to_string(),
                })
            )
        );
    }
}
