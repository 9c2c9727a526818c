use async_trait::async_trait;
use log::info;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };

use super::{
    build_http,
    http_line_stream,
    send_checked,
    sse_data,
    stream_event,
    ChatClient,
    CompletionRequest,
    CompletionResponse,
    PromptMessage,
    ProviderError,
    TokenStream,
    TokenUsage,
};
use crate::llm::{ Provider, ProviderConfig };
use crate::models::chat::Role;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<AnthropicDelta>,
}

#[derive(Deserialize)]
struct AnthropicDelta {
    #[serde(default)]
    text: Option<String>,
}

/// Splits system messages out of the turn list; the Messages API takes them separately.
fn split_system(messages: &[PromptMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system_parts = Vec::new();
    let mut turns = Vec::new();

    for m in messages {
        match m.role {
            Role::System => system_parts.push(m.content.clone()),
            Role::User => turns.push(AnthropicMessage { role: "user", content: m.content.clone() }),
            Role::Assistant =>
                turns.push(AnthropicMessage { role: "assistant", content: m.content.clone() }),
        }
    }

    let system = if system_parts.is_empty() { None } else { Some(system_parts.join("\n\n")) };
    (system, turns)
}

pub(crate) fn parse_anthropic_stream_line(line: &str) -> Option<Result<String, ProviderError>> {
    let data = sse_data(line)?;
    let event = match stream_event::<AnthropicStreamEvent>(data)? {
        Ok(ev) => ev,
        Err(e) => {
            return Some(Err(e));
        }
    };
    if event.kind != "content_block_delta" {
        return None;
    }
    event.delta
        .and_then(|d| d.text)
        .filter(|t| !t.is_empty())
        .map(Ok)
}

impl AnthropicChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&api_key).map_err(|e|
                ProviderError::Config(format!("Invalid API key format: {}", e))
            )?
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));

        Ok(Self {
            http: build_http(headers)?,
            model: model.unwrap_or_else(|| Provider::Anthropic.default_model().to_string()),
            base_url: base_url.unwrap_or_else(|| Provider::Anthropic.default_base_url().to_string()),
            max_tokens: 2048,
            temperature: 0.7,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| ProviderError::Config("Anthropic API key is required".to_string()))?;
        let mut client = Self::new(api_key, Some(config.model.clone()), config.base_url.clone())?;
        client.max_tokens = config.max_tokens;
        client.temperature = config.temperature;
        Ok(client)
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> AnthropicRequest {
        let (system, messages) = split_system(&request.messages);
        AnthropicRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            temperature: request.temperature.unwrap_or(self.temperature),
            system,
            stream: if stream { Some(true) } else { None },
        }
    }
}

#[async_trait]
impl ChatClient for AnthropicChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let req = self.build_request(request, false);
        let model = req.model.clone();

        let resp = send_checked(self.http.post(self.endpoint()).json(&req)).await?
            .json::<AnthropicResponse>().await?;

        let content: String = resp.content
            .into_iter()
            .filter_map(|b| b.text)
            .collect();
        if content.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        Ok(CompletionResponse {
            content,
            model: resp.model.unwrap_or(model),
            usage: resp.usage.map(|u| TokenUsage::new(u.input_tokens, u.output_tokens)),
            finish_reason: resp.stop_reason,
        })
    }

    async fn stream_completion(&self, request: &CompletionRequest) -> Result<TokenStream, ProviderError> {
        let req = self.build_request(request, true);
        info!("Starting Anthropic stream request for model {}", req.model);
        Ok(http_line_stream(self.http.post(self.endpoint()).json(&req), parse_anthropic_stream_line))
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}
