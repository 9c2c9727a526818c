use serde::{ Deserialize, Serialize };
use std::fmt;
use std::str::FromStr;

use super::RouterError;
use crate::llm::catalog::find_model;
use crate::llm::{ ModelCapability, Provider };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Chat,
    CodeCompletion,
    CodeAnalysis,
    LongContext,
    CostEffective,
}

use Provider::*;

const CHAT_ORDER: &[Provider] = &[Anthropic, OpenAI, Google, DeepSeek, XAI, Mistral, Groq, Ollama];
const COMPLETION_ORDER: &[Provider] = &[DeepSeek, OpenAI, Mistral, Groq, Anthropic, Google, Ollama, XAI];
const ANALYSIS_ORDER: &[Provider] = &[Anthropic, OpenAI, DeepSeek, Google, XAI, Mistral, Groq, Ollama];
const LONG_CONTEXT_ORDER: &[Provider] = &[Google, Anthropic, OpenAI, XAI, Groq, Mistral, DeepSeek, Ollama];
const COST_ORDER: &[Provider] = &[Ollama, Groq, DeepSeek, Google, Mistral, Anthropic, OpenAI, XAI];

impl TaskType {
    /// Providers in order of preference for this task; every provider appears once.
    pub fn preference(&self) -> &'static [Provider] {
        match self {
            TaskType::Chat => CHAT_ORDER,
            TaskType::CodeCompletion => COMPLETION_ORDER,
            TaskType::CodeAnalysis => ANALYSIS_ORDER,
            TaskType::LongContext => LONG_CONTEXT_ORDER,
            TaskType::CostEffective => COST_ORDER,
        }
    }

    pub fn capability(&self) -> ModelCapability {
        match self {
            TaskType::Chat | TaskType::CostEffective => ModelCapability::Chat,
            TaskType::CodeCompletion => ModelCapability::CodeCompletion,
            TaskType::CodeAnalysis => ModelCapability::CodeAnalysis,
            TaskType::LongContext => ModelCapability::LongContext,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Chat => "chat",
            TaskType::CodeCompletion => "code_completion",
            TaskType::CodeAnalysis => "code_analysis",
            TaskType::LongContext => "long_context",
            TaskType::CostEffective => "cost_effective",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "chat" => Ok(TaskType::Chat),
            "code_completion" | "completion" => Ok(TaskType::CodeCompletion),
            "code_analysis" | "analysis" => Ok(TaskType::CodeAnalysis),
            "long_context" => Ok(TaskType::LongContext),
            "cost_effective" => Ok(TaskType::CostEffective),
            _ => Err(RouterError::InvalidRequest(format!("Unknown task type: '{}'", s))),
        }
    }
}

/// Which provider (and optionally which model) a request targets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    Auto,
    Explicit {
        provider: Provider,
        model: Option<String>,
    },
}

impl Selection {
    pub fn provider(provider: Provider) -> Self {
        Selection::Explicit { provider, model: None }
    }

    /// Accepts `auto`, a provider name, `provider/model`, `provider:model`, or a catalog model id.
    pub fn parse(raw: &str) -> Result<Self, RouterError> {
        let s = raw.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("auto") {
            return Ok(Selection::Auto);
        }
        if let Ok(provider) = s.parse::<Provider>() {
            return Ok(Selection::provider(provider));
        }
        if let Some(info) = find_model(s) {
            return Ok(Selection::Explicit {
                provider: info.provider,
                model: Some(info.model.to_string()),
            });
        }
        for sep in ['/', ':'] {
            if let Some((head, tail)) = s.split_once(sep) {
                if let Ok(provider) = head.parse::<Provider>() {
                    let tail = tail.trim();
                    if tail.is_empty() {
                        break;
                    }
                    let model = find_model(tail)
                        .filter(|m| m.provider == provider)
                        .map(|m| m.model.to_string())
                        .unwrap_or_else(|| tail.to_string());
                    return Ok(Selection::Explicit { provider, model: Some(model) });
                }
            }
        }
        Err(RouterError::InvalidRequest(format!("Unknown model selection: '{}'", raw)))
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Auto => f.write_str("auto"),
            Selection::Explicit { provider, model: None } => write!(f, "{}", provider),
            Selection::Explicit { provider, model: Some(m) } => write!(f, "{}/{}", provider, m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_table_lists_each_provider_once() {
        for task in [
            TaskType::Chat,
            TaskType::CodeCompletion,
            TaskType::CodeAnalysis,
            TaskType::LongContext,
            TaskType::CostEffective,
        ] {
            let table = task.preference();
            assert_eq!(table.len(), Provider::ALL.len(), "{}", task);
            for p in Provider::ALL {
                assert_eq!(table.iter().filter(|x| **x == p).count(), 1, "{} in {}", p, task);
            }
        }
    }

    #[test]
    fn parses_selection_forms() {
        assert_eq!(Selection::parse("").unwrap(), Selection::Auto);
        assert_eq!(Selection::parse("AUTO").unwrap(), Selection::Auto);
        assert_eq!(Selection::parse("anthropic").unwrap(), Selection::provider(Provider::Anthropic));
        assert_eq!(Selection::parse("gpt-4-turbo").unwrap(), Selection::Explicit {
            provider: Provider::OpenAI,
            model: Some("gpt-4-turbo".into()),
        });
        assert_eq!(Selection::parse("claude/claude-3-haiku").unwrap(), Selection::Explicit {
            provider: Provider::Anthropic,
            model: Some("claude-3-haiku-20240307".into()),
        });
        assert_eq!(Selection::parse("ollama:qwen2.5-coder").unwrap(), Selection::Explicit {
            provider: Provider::Ollama,
            model: Some("qwen2.5-coder".into()),
        });
        assert!(matches!(Selection::parse("cohere/command-r"), Err(RouterError::InvalidRequest(_))));
        assert!(matches!(Selection::parse("openai/"), Err(RouterError::InvalidRequest(_))));
    }

    #[test]
    fn parses_task_aliases() {
        assert_eq!("code-completion".parse::<TaskType>().unwrap(), TaskType::CodeCompletion);
        assert_eq!("analysis".parse::<TaskType>().unwrap(), TaskType::CodeAnalysis);
        assert!("poetry".parse::<TaskType>().is_err());
    }
}
