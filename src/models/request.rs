use serde::{ Deserialize, Serialize };
use serde_json::Value;
use uuid::Uuid;

use crate::llm::chat::{ PromptMessage, TokenUsage };
use crate::llm::Provider;
use crate::router::{ AttemptFailure, TaskType };

/// Editor state captured by the extension and attached to a request.
///
/// The nested objects are kept as loose JSON since each editor host reports
/// slightly different fields; accessors below read the ones the backend uses.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EditorContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Value>,
    #[serde(default)]
    pub open_files: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_info: Option<Value>,
}

fn str_field<'a>(value: &'a Option<Value>, key: &str) -> Option<&'a str> {
    value
        .as_ref()
        .and_then(|v| v.get(key))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

impl EditorContext {
    pub fn file_name(&self) -> Option<&str> {
        str_field(&self.editor, "fileName")
    }

    pub fn language(&self) -> Option<&str> {
        str_field(&self.editor, "language")
    }

    pub fn selected_text(&self) -> Option<&str> {
        str_field(&self.selection, "text")
    }

    pub fn workspace_name(&self) -> Option<&str> {
        str_field(&self.workspace, "name")
    }

    pub fn project_type(&self) -> Option<&str> {
        str_field(&self.project_info, "type")
    }

    pub fn dependencies(&self) -> Vec<&str> {
        self.project_info
            .as_ref()
            .and_then(|p| p.get("dependencies"))
            .and_then(Value::as_array)
            .map(|deps| deps.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Context used for code-only requests: the selection plus its language.
    pub fn for_code(code: &str, language: &str) -> Self {
        Self {
            selection: Some(serde_json::json!({ "text": code })),
            editor: Some(serde_json::json!({ "language": language })),
            ..Default::default()
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub context: Option<EditorContext>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// `auto`, a provider name, `provider/model`, or a catalog model id.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_true")]
    pub fallback: bool,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            conversation_id: None,
            model: None,
            stream: false,
            fallback: true,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatResponse {
    #[serde(rename = "message_id")]
    pub id: String,
    pub response: String,
    pub conversation_id: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    pub model_used: String,
    pub provider: Provider,
    /// Providers that failed before the one that answered.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptFailure>,
}

impl ChatResponse {
    pub fn new(
        response: String,
        conversation_id: String,
        provider: Provider,
        model_used: String
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            response,
            conversation_id,
            timestamp: chrono::Utc::now().timestamp(),
            tokens_used: None,
            model_used,
            provider,
            attempts: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TitleRequest {
    pub title: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModelSelectionRequest {
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default = "default_context_length")]
    pub context_length: u32,
}

fn default_context_length() -> u32 {
    4000
}

/// Direct generation against the router, bypassing conversation history.
#[derive(Clone, Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<PromptMessage>,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_true")]
    pub fallback: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct GenerateResponse {
    pub content: String,
    pub model_id: String,
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptFailure>,
}
