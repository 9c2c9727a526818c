use async_trait::async_trait;
use log::info;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
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

/// Client for the `/chat/completions` dialect shared by OpenAI, xAI, DeepSeek, Groq and Mistral.
pub struct OpenAICompatibleClient {
    http: HttpClient,
    provider: Provider,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIDelta,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

fn to_openai_messages(messages: &[PromptMessage]) -> Vec<OpenAIMessage> {
    messages
        .iter()
        .map(|m| OpenAIMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        })
        .collect()
}

pub(crate) fn parse_openai_stream_line(line: &str) -> Option<Result<String, ProviderError>> {
    let data = sse_data(line)?;
    match stream_event::<OpenAIStreamResponse>(data)? {
        Ok(stream_resp) => {
            let text: String = stream_resp.choices
                .into_iter()
                .filter_map(|c| c.delta.content)
                .collect();
            if text.is_empty() { None } else { Some(Ok(text)) }
        }
        Err(e) => Some(Err(e)),
    }
}

impl OpenAICompatibleClient {
    pub fn new(
        provider: Provider,
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, ProviderError> {
        let chat_model = model.unwrap_or_else(|| provider.default_model().to_string());
        let api_url = base_url.unwrap_or_else(|| provider.default_base_url().to_string());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
                ProviderError::Config(format!("Invalid API key format: {}", e))
            )?
        );

        Ok(Self {
            http: build_http(headers)?,
            provider,
            model: chat_model,
            base_url: api_url,
            max_tokens: 2048,
            temperature: 0.7,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| ProviderError::Config(format!("{} API key is required", config.provider)))?;

        let mut client = Self::new(
            config.provider,
            api_key,
            Some(config.model.clone()),
            config.base_url.clone()
        )?;
        client.max_tokens = config.max_tokens;
        client.temperature = config.temperature;
        Ok(client)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> OpenAIChatRequest {
        OpenAIChatRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: to_openai_messages(&request.messages),
            temperature: request.temperature.unwrap_or(self.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            stream: if stream { Some(true) } else { None },
        }
    }
}

#[async_trait]
impl ChatClient for OpenAICompatibleClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let req = self.build_request(request, false);
        let model = req.model.clone();

        let resp = send_checked(self.http.post(self.endpoint()).json(&req)).await?
            .json::<OpenAIResponse>().await?;

        let choice = resp.choices.into_iter().next().ok_or(ProviderError::EmptyResponse)?;
        let content = choice.message.content.ok_or(ProviderError::EmptyResponse)?;

        Ok(CompletionResponse {
            content,
            model: resp.model.unwrap_or(model),
            usage: resp.usage.map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
            finish_reason: choice.finish_reason,
        })
    }

    async fn stream_completion(&self, request: &CompletionRequest) -> Result<TokenStream, ProviderError> {
        let req = self.build_request(request, true);
        let url = self.endpoint();
        info!("Starting {} stream request to {}", self.provider, url);
        Ok(http_line_stream(self.http.post(url).json(&req), parse_openai_stream_line))
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::Role;

    #[test]
    fn parses_stream_deltas() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        assert_eq!(parse_openai_stream_line(line), Some(Ok("Hel".to_string())));
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_openai_stream_line(role_only), None);
        assert_eq!(parse_openai_stream_line("data: [DONE]"), None);
    }

    #[test]
    fn request_uses_overrides() {
        let client = OpenAICompatibleClient::new(
            Provider::Groq,
            "key".into(),
            None,
            Some("http://localhost:9999/v1/".into())
        ).expect("client");
        assert_eq!(client.endpoint(), "http://localhost:9999/v1/chat/completions");

        let request = CompletionRequest {
            messages: vec![PromptMessage::new(Role::User, "hi")],
            model: Some("llama-3.3-70b".into()),
            max_tokens: Some(64),
            temperature: None,
        };
        let body = serde_json::to_value(client.build_request(&request, true)).expect("json");
        assert_eq!(body["model"], "llama-3.3-70b");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "user");
    }
}
