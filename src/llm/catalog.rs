use super::Provider;
use serde::{ Deserialize, Serialize };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCapability {
    Chat,
    CodeCompletion,
    CodeAnalysis,
    FunctionCalling,
    Vision,
    LongContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    /// Identifier sent to the vendor API.
    pub model: &'static str,
    pub name: &'static str,
    pub provider: Provider,
    pub max_tokens: u32,
    pub context_length: u32,
    pub capabilities: &'static [ModelCapability],
    pub cost_per_1k_tokens: f64,
    pub description: &'static str,
}

impl ModelInfo {
    pub fn supports(&self, capability: ModelCapability) -> bool {
        self.capabilities.contains(&capability)
    }
}

use ModelCapability::*;

pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "gpt-4o",
        model: "gpt-4o",
        name: "GPT-4o",
        provider: Provider::OpenAI,
        max_tokens: 4096,
        context_length: 128000,
        capabilities: &[Chat, CodeCompletion, CodeAnalysis, FunctionCalling, Vision, LongContext],
        cost_per_1k_tokens: 0.005,
        description: "Flagship OpenAI model with vision and 128k context",
    },
    ModelInfo {
        id: "gpt-4",
        model: "gpt-4",
        name: "GPT-4",
        provider: Provider::OpenAI,
        max_tokens: 8192,
        context_length: 8192,
        capabilities: &[Chat, CodeCompletion, CodeAnalysis, FunctionCalling],
        cost_per_1k_tokens: 0.03,
        description: "Capable OpenAI model for complex reasoning",
    },
    ModelInfo {
        id: "gpt-4-turbo",
        model: "gpt-4-turbo",
        name: "GPT-4 Turbo",
        provider: Provider::OpenAI,
        max_tokens: 4096,
        context_length: 128000,
        capabilities: &[Chat, CodeCompletion, CodeAnalysis, FunctionCalling, Vision, LongContext],
        cost_per_1k_tokens: 0.01,
        description: "GPT-4 with 128k context and vision",
    },
    ModelInfo {
        id: "gpt-3.5-turbo",
        model: "gpt-3.5-turbo",
        name: "GPT-3.5 Turbo",
        provider: Provider::OpenAI,
        max_tokens: 4096,
        context_length: 16385,
        capabilities: &[Chat, CodeCompletion, FunctionCalling],
        cost_per_1k_tokens: 0.001,
        description: "Fast and cost-effective for most tasks",
    },
    ModelInfo {
        id: "claude-3-5-sonnet",
        model: "claude-3-5-sonnet-latest",
        name: "Claude 3.5 Sonnet",
        provider: Provider::Anthropic,
        max_tokens: 8192,
        context_length: 200000,
        capabilities: &[Chat, CodeCompletion, CodeAnalysis, LongContext, Vision],
        cost_per_1k_tokens: 0.003,
        description: "Strong coding and analysis model with long context",
    },
    ModelInfo {
        id: "claude-3-opus",
        model: "claude-3-opus-20240229",
        name: "Claude 3 Opus",
        provider: Provider::Anthropic,
        max_tokens: 4096,
        context_length: 200000,
        capabilities: &[Chat, CodeAnalysis, LongContext, Vision],
        cost_per_1k_tokens: 0.015,
        description: "Most powerful Claude 3 model for complex analysis",
    },
    ModelInfo {
        id: "claude-3-haiku",
        model: "claude-3-haiku-20240307",
        name: "Claude 3 Haiku",
        provider: Provider::Anthropic,
        max_tokens: 4096,
        context_length: 200000,
        capabilities: &[Chat, CodeCompletion, LongContext],
        cost_per_1k_tokens: 0.00025,
        description: "Fastest Claude model for quick responses",
    },
    ModelInfo {
        id: "gemini-1.5-flash",
        model: "gemini-1.5-flash-latest",
        name: "Gemini 1.5 Flash",
        provider: Provider::Google,
        max_tokens: 8192,
        context_length: 1048576,
        capabilities: &[Chat, CodeCompletion, CodeAnalysis, LongContext, Vision],
        cost_per_1k_tokens: 0.00035,
        description: "Fast Gemini model with a 1M token window",
    },
    ModelInfo {
        id: "gemini-pro",
        model: "gemini-pro",
        name: "Gemini Pro",
        provider: Provider::Google,
        max_tokens: 8192,
        context_length: 32768,
        capabilities: &[Chat, CodeAnalysis, FunctionCalling],
        cost_per_1k_tokens: 0.0005,
        description: "General purpose Gemini model",
    },
    ModelInfo {
        id: "grok-3",
        model: "grok-3-latest",
        name: "Grok 3",
        provider: Provider::XAI,
        max_tokens: 4096,
        context_length: 131072,
        capabilities: &[Chat, CodeAnalysis, LongContext],
        cost_per_1k_tokens: 0.003,
        description: "xAI conversational model",
    },
    ModelInfo {
        id: "deepseek-coder",
        model: "deepseek-coder",
        name: "DeepSeek Coder",
        provider: Provider::DeepSeek,
        max_tokens: 4096,
        context_length: 16384,
        capabilities: &[Chat, CodeCompletion, CodeAnalysis],
        cost_per_1k_tokens: 0.0014,
        description: "Specialized for code generation and analysis",
    },
    ModelInfo {
        id: "deepseek-chat",
        model: "deepseek-chat",
        name: "DeepSeek Chat",
        provider: Provider::DeepSeek,
        max_tokens: 4096,
        context_length: 32768,
        capabilities: &[Chat, CodeAnalysis],
        cost_per_1k_tokens: 0.0014,
        description: "General purpose conversational model",
    },
    ModelInfo {
        id: "llama-3.1-8b",
        model: "llama-3.1-8b-instant",
        name: "Llama 3.1 8B (Groq)",
        provider: Provider::Groq,
        max_tokens: 8192,
        context_length: 131072,
        capabilities: &[Chat, CodeCompletion],
        cost_per_1k_tokens: 0.00005,
        description: "Low latency Llama hosted on Groq",
    },
    ModelInfo {
        id: "mistral-large",
        model: "mistral-large-latest",
        name: "Mistral Large",
        provider: Provider::Mistral,
        max_tokens: 8192,
        context_length: 32768,
        capabilities: &[Chat, CodeAnalysis, FunctionCalling],
        cost_per_1k_tokens: 0.008,
        description: "Mistral's most capable model",
    },
    ModelInfo {
        id: "codestral",
        model: "codestral-latest",
        name: "Codestral",
        provider: Provider::Mistral,
        max_tokens: 8192,
        context_length: 32768,
        capabilities: &[CodeCompletion, CodeAnalysis],
        cost_per_1k_tokens: 0.001,
        description: "Mistral code model",
    },
    ModelInfo {
        id: "llama3.1",
        model: "llama3.1",
        name: "Llama 3.1 (local)",
        provider: Provider::Ollama,
        max_tokens: 4096,
        context_length: 8192,
        capabilities: &[Chat, CodeCompletion],
        cost_per_1k_tokens: 0.0,
        description: "Meta Llama 3.1 running locally",
    },
    ModelInfo {
        id: "codellama",
        model: "codellama",
        name: "Code Llama (local)",
        provider: Provider::Ollama,
        max_tokens: 4096,
        context_length: 16384,
        capabilities: &[CodeCompletion, CodeAnalysis],
        cost_per_1k_tokens: 0.0,
        description: "Code model running locally",
    },
];

/// Looks a model up by catalog id or by vendor model identifier.
pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.id == id || m.model == id)
}

pub fn models_by_provider(provider: Provider) -> impl Iterator<Item = &'static ModelInfo> {
    MODELS.iter().filter(move |m| m.provider == provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_by_alias_or_vendor_id() {
        let by_alias = find_model("claude-3-haiku").map(|m| m.model);
        let by_vendor = find_model("claude-3-haiku-20240307").map(|m| m.id);
        assert_eq!(by_alias, Some("claude-3-haiku-20240307"));
        assert_eq!(by_vendor, Some("claude-3-haiku"));
        assert!(find_model("gpt-17").is_none());
    }

    #[test]
    fn every_provider_default_model_is_cataloged() {
        for provider in Provider::ALL {
            let info = find_model(provider.default_model());
            assert_eq!(info.map(|m| m.provider), Some(provider), "{}", provider);
        }
    }
}
