pub mod chat;
pub mod catalog;

use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;

pub use catalog::{ ModelCapability, ModelInfo };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
    Google,
    XAI,
    DeepSeek,
    Groq,
    Mistral,
    Ollama,
}

impl Provider {
    pub const ALL: [Provider; 8] = [
        Provider::OpenAI,
        Provider::Anthropic,
        Provider::Google,
        Provider::XAI,
        Provider::DeepSeek,
        Provider::Groq,
        Provider::Mistral,
        Provider::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::XAI => "xai",
            Provider::DeepSeek => "deepseek",
            Provider::Groq => "groq",
            Provider::Mistral => "mistral",
            Provider::Ollama => "ollama",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAI => "gpt-4o",
            Provider::Anthropic => "claude-3-5-sonnet-latest",
            Provider::Google => "gemini-1.5-flash-latest",
            Provider::XAI => "grok-3-latest",
            Provider::DeepSeek => "deepseek-chat",
            Provider::Groq => "llama-3.1-8b-instant",
            Provider::Mistral => "mistral-large-latest",
            Provider::Ollama => "llama3.1",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::Google => "https://generativelanguage.googleapis.com",
            Provider::XAI => "https://api.x.ai/v1",
            Provider::DeepSeek => "https://api.deepseek.com/v1",
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::Mistral => "https://api.mistral.ai/v1",
            Provider::Ollama => "http://localhost:11434",
        }
    }

    /// Environment variable that carries this provider's credential.
    pub fn credential_env(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Google => "GOOGLE_API_KEY",
            Provider::XAI => "XAI_API_KEY",
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
            Provider::Groq => "GROQ_API_KEY",
            Provider::Mistral => "MISTRAL_API_KEY",
            Provider::Ollama => "OLLAMA_BASE_URL",
        }
    }

    /// Local runtimes are addressed by URL instead of an API key.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Provider::Ollama)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseProviderError {
    message: String,
}

impl fmt::Display for ParseProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseProviderError {}

impl FromStr for Provider {
    type Err = ParseProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "google" | "gemini" => Ok(Provider::Google),
            "xai" | "grok" => Ok(Provider::XAI),
            "deepseek" => Ok(Provider::DeepSeek),
            "groq" => Ok(Provider::Groq),
            "mistral" => Ok(Provider::Mistral),
            "ollama" => Ok(Provider::Ollama),
            _ =>
                Err(ParseProviderError {
                    message: format!("Invalid provider: '{}'", s),
                }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub context_window: u32,
    pub cost_per_1k_tokens: f64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ProviderConfig {
    /// Defaults for `provider`, with limits taken from the catalog entry of its default model.
    pub fn new(provider: Provider) -> Self {
        let mut config = Self {
            provider,
            model: provider.default_model().to_string(),
            api_key: None,
            base_url: None,
            context_window: 8192,
            cost_per_1k_tokens: 0.0,
            max_tokens: 2048,
            temperature: 0.7,
        };
        config.apply_catalog_limits();
        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self.apply_catalog_limits();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into()).filter(|k: &String| !k.trim().is_empty());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into()).filter(|u: &String| !u.trim().is_empty());
        self
    }

    fn apply_catalog_limits(&mut self) {
        if let Some(info) = catalog::find_model(&self.model) {
            if info.provider == self.provider {
                self.context_window = info.context_length;
                self.cost_per_1k_tokens = info.cost_per_1k_tokens;
            }
        }
    }

    pub fn credential_env(&self) -> &'static str {
        self.provider.credential_env()
    }

    /// A provider may only be dispatched to once its credential is present.
    pub fn is_configured(&self) -> bool {
        if self.provider.requires_api_key() {
            self.api_key.as_deref().map(|k| !k.trim().is_empty()).unwrap_or(false)
        } else {
            self.base_url.is_some()
        }
    }

    pub fn base_url_or_default(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
    }
}
