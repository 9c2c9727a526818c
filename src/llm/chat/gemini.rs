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

pub struct GeminiChatClient {
    http: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

impl GeminiResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c|
                c.parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            )
            .unwrap_or_default()
    }
}

fn text_content(role: Option<&str>, text: &str) -> GeminiContent {
    GeminiContent {
        role: role.map(str::to_string),
        parts: vec![GeminiPart { text: text.to_string() }],
    }
}

/// Gemini names the assistant role `model` and takes the system prompt as `systemInstruction`.
fn to_gemini_contents(messages: &[PromptMessage]) -> (Option<GeminiContent>, Vec<GeminiContent>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let contents = messages
        .iter()
        .filter_map(|m| match m.role {
            Role::System => None,
            Role::User => Some(text_content(Some("user"), &m.content)),
            Role::Assistant => Some(text_content(Some("model"), &m.content)),
        })
        .collect();

    let instruction = if system.is_empty() {
        None
    } else {
        Some(text_content(None, &system.join("\n\n")))
    };
    (instruction, contents)
}

pub(crate) fn parse_gemini_line(line: &str) -> Option<Result<String, ProviderError>> {
    let data = sse_data(line)?;
    match stream_event::<GeminiResponse>(data)? {
        Ok(chunk) => {
            let text = chunk.text();
            if text.is_empty() { None } else { Some(Ok(text)) }
        }
        Err(e) => Some(Err(e)),
    }
}

impl GeminiChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            http: build_http(headers)?,
            api_key,
            model: model.unwrap_or_else(|| Provider::Google.default_model().to_string()),
            base_url: base_url.unwrap_or_else(|| Provider::Google.default_base_url().to_string()),
            max_tokens: 2048,
            temperature: 0.7,
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| ProviderError::Config("Google API key is required".to_string()))?;
        let mut client = Self::new(api_key, Some(config.model.clone()), config.base_url.clone())?;
        client.max_tokens = config.max_tokens;
        client.temperature = config.temperature;
        Ok(client)
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url.trim_end_matches('/'), model, method)
    }

    fn build_request(&self, request: &CompletionRequest) -> GeminiRequest {
        let (system_instruction, contents) = to_gemini_contents(&request.messages);
        GeminiRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                max_output_tokens: request.max_tokens.unwrap_or(self.max_tokens),
                temperature: request.temperature.unwrap_or(self.temperature),
            },
        }
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let url = self.endpoint(&model, "generateContent");

        let resp = send_checked(
            self.http
                .post(url)
                .query(&[("key", self.api_key.as_str())])
                .json(&self.build_request(request))
        ).await?
            .json::<GeminiResponse>().await?;

        let content = resp.text();
        if content.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        Ok(CompletionResponse {
            content,
            model,
            usage: resp.usage_metadata.map(|u|
                TokenUsage::new(u.prompt_token_count, u.candidates_token_count)
            ),
            finish_reason: resp.candidates.into_iter().next().and_then(|c| c.finish_reason),
        })
    }

    async fn stream_completion(&self, request: &CompletionRequest) -> Result<TokenStream, ProviderError> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let url = self.endpoint(&model, "streamGenerateContent");
        info!("Starting Gemini stream request for model {}", model);

        let builder = self.http
            .post(url)
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
            .json(&self.build_request(request));
        Ok(http_line_stream(builder, parse_gemini_line))
    }

    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn model(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_roles_for_gemini() {
        let messages = vec![
            PromptMessage::new(Role::System, "sys"),
            PromptMessage::new(Role::User, "q"),
            PromptMessage::new(Role::Assistant, "a")
        ];
        let (system, contents) = to_gemini_contents(&messages);
        assert_eq!(system.map(|s| s.parts[0].text.clone()).as_deref(), Some("sys"));
        let roles: Vec<_> = contents
            .iter()
            .map(|c| c.role.clone().unwrap_or_default())
            .collect();
        assert_eq!(roles, vec!["user", "model"]);
    }

    #[test]
    fn parses_sse_chunk() {
        let line =
            r#"data: {"candidates":[{"content":{"parts":[{"text":"fn main"}],"role":"model"}}]}"#;
        assert_eq!(parse_gemini_line(line), Some(Ok("fn main".to_string())));
        assert_eq!(parse_gemini_line(r#"data: {"candidates":[]}"#), None);
    }

    #[test]
    fn error_chunk_keeps_its_status() {
        let line = r#"data: {"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#;
        assert_eq!(
            parse_gemini_line(line),
            Some(Err(ProviderError::Status { status: 503, body: "The model is overloaded.".to_string() }))
        );
    }
}
