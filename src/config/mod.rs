pub mod prompt;

use log::info;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::cli::Args;
use crate::llm::catalog::find_model;
use crate::llm::{ Provider, ProviderConfig };
use crate::router::Selection;
pub use prompt::{ PromptConfig, PromptError };

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")] InvalidValue {
        key: &'static str,
        message: String,
    },
    #[error("failed to load config file '{path}': {message}")] File {
        path: String,
        message: String,
    },
    #[error(transparent)] Prompt(#[from] PromptError),
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue { key, message: message.into() }
}

/// Loads a flat `KEY=VALUE` file into the process environment.
/// Variables that are already set keep their value.
pub fn load_config_file(path: &str) -> Result<(), ConfigError> {
    if !Path::new(path).is_file() {
        return Err(ConfigError::File { path: path.to_string(), message: "not a file".to_string() });
    }
    dotenv::from_path(path).map_err(|e| ConfigError::File {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    info!("Loaded configuration from {}", path);
    Ok(())
}

/// Runtime settings resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub providers: Vec<ProviderConfig>,
    pub default_selection: Selection,
    pub fallback_order: Vec<Provider>,
    pub request_timeout: Duration,
    pub max_history: usize,
    pub max_message_length: usize,
    pub cors_origins: Vec<String>,
    pub prompts_path: Option<String>,
}

pub fn parse_provider_list(raw: &str) -> Result<Vec<Provider>, ConfigError> {
    let mut providers = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let provider = name.parse::<Provider>().map_err(|e| invalid("FALLBACK_ORDER", e.to_string()))?;
        if !providers.contains(&provider) {
            providers.push(provider);
        }
    }
    Ok(providers)
}

fn provider_config(
    provider: Provider,
    api_key: &Option<String>,
    base_url: &Option<String>,
    model: &Option<String>,
    args: &Args
) -> ProviderConfig {
    let mut config = ProviderConfig::new(provider);
    if let Some(model) = model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        // catalog aliases resolve to the vendor's model id
        let resolved = find_model(model)
            .filter(|m| m.provider == provider)
            .map(|m| m.model)
            .unwrap_or(model);
        config = config.with_model(resolved);
    }
    if let Some(key) = api_key {
        config = config.with_api_key(key.trim());
    }
    if let Some(url) = base_url {
        config = config.with_base_url(url.trim());
    }
    config.max_tokens = args.max_tokens;
    config.temperature = args.temperature;
    config
}

impl Settings {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        if args.max_history == 0 {
            return Err(invalid("MAX_HISTORY", "must be at least 1"));
        }
        if args.request_timeout_secs == 0 {
            return Err(invalid("REQUEST_TIMEOUT_SECS", "must be at least 1"));
        }
        if args.max_message_length == 0 {
            return Err(invalid("MAX_MESSAGE_LENGTH", "must be at least 1"));
        }
        if !(0.0..=2.0).contains(&args.temperature) {
            return Err(invalid("TEMPERATURE", format!("{} is outside 0.0..=2.0", args.temperature)));
        }

        let default_selection = Selection::parse(&args.default_model).map_err(|e|
            invalid("DEFAULT_MODEL", e.to_string())
        )?;

        let providers = vec![
            provider_config(Provider::OpenAI, &args.openai_api_key, &args.openai_base_url, &args.openai_model, args),
            provider_config(
                Provider::Anthropic,
                &args.anthropic_api_key,
                &args.anthropic_base_url,
                &args.anthropic_model,
                args
            ),
            provider_config(Provider::Google, &args.google_api_key, &args.google_base_url, &args.google_model, args),
            provider_config(Provider::XAI, &args.xai_api_key, &args.xai_base_url, &args.xai_model, args),
            provider_config(
                Provider::DeepSeek,
                &args.deepseek_api_key,
                &args.deepseek_base_url,
                &args.deepseek_model,
                args
            ),
            provider_config(Provider::Groq, &args.groq_api_key, &args.groq_base_url, &args.groq_model, args),
            provider_config(
                Provider::Mistral,
                &args.mistral_api_key,
                &args.mistral_base_url,
                &args.mistral_model,
                args
            ),
            provider_config(Provider::Ollama, &None, &args.ollama_base_url, &args.ollama_model, args)
        ];

        let cors_origins = args.cors_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            providers,
            default_selection,
            fallback_order: parse_provider_list(&args.fallback_order)?,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            max_history: args.max_history,
            max_message_length: args.max_message_length,
            cors_origins,
            prompts_path: args.prompts_path.clone().filter(|p| !p.trim().is_empty()),
        })
    }
}
